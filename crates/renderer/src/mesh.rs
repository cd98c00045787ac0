//! CPU-side geometry uploaded into the vertex and index buffers.

use glam::{Vec2, Vec3};

use frametech_rhi::vertex::Vertex;

/// Vertex and index data for the single indexed draw.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// A red/green/blue triangle centred in clip space.
    ///
    /// Wound clockwise in Vulkan's y-down clip space, so it survives
    /// back-face culling with a clockwise front face.
    pub fn triangle() -> Self {
        Self::new(
            vec![
                Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
                Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
                Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
            ],
            vec![0, 1, 2],
        )
    }

    /// Number of indices passed to `draw_indexed`.
    pub fn index_count(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// True when every index refers to an existing vertex.
    pub fn indices_in_range(&self) -> bool {
        let count = self.vertices.len();
        self.indices.iter().all(|&i| (i as usize) < count)
    }
}

impl Default for MeshData {
    fn default() -> Self {
        Self::triangle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_layout() {
        let mesh = MeshData::triangle();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.index_count(), 3);
        assert!(mesh.indices_in_range());
        assert_eq!(mesh.vertex_bytes().len(), 3 * std::mem::size_of::<Vertex>());
        assert_eq!(mesh.index_bytes().len(), 12);
    }

    #[test]
    fn test_triangle_is_clockwise_in_clip_space() {
        let mesh = MeshData::triangle();
        let [a, b, c] = [0, 1, 2].map(|i| mesh.vertices[mesh.indices[i] as usize].position);
        // Positive signed area with y pointing down means clockwise on screen.
        let area = (b - a).perp_dot(c - a);
        assert!(area > 0.0);
    }

    #[test]
    fn test_out_of_range_index_detected() {
        let mut mesh = MeshData::triangle();
        mesh.indices.push(3);
        assert!(!mesh.indices_in_range());
    }
}
