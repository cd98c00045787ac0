//! FrameTech demo shell.
//!
//! Opens a fixed-size window, builds the engine and renders until the window
//! is closed or the frame loop stops on a fatal error.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info};

use frametech_core::AppConfig;
use frametech_platform::{
    ActiveEventLoop, ApplicationHandler, ControlFlow, EventLoop, Window, WindowEvent, WindowId,
};
use frametech_renderer::{Engine, FrameScheduler};

/// Lifecycle of the application shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppState {
    Uninitialized,
    Running,
    /// Window hidden; frames are skipped.
    Paused,
    ShouldBeClosed,
    Closing,
}

impl AppState {
    fn on_occluded(self, occluded: bool) -> Self {
        match (self, occluded) {
            (AppState::Running, true) => AppState::Paused,
            (AppState::Paused, false) => AppState::Running,
            (state, _) => state,
        }
    }

    fn is_drawing(self) -> bool {
        self == AppState::Running
    }
}

struct App {
    config: AppConfig,
    state: AppState,
    scheduler: FrameScheduler,
    // Dropped before the window it renders to.
    engine: Option<Engine>,
    window: Option<Window>,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: AppConfig) -> Self {
        let scheduler = FrameScheduler::new(config.fps_limit);
        Self {
            config,
            state: AppState::Uninitialized,
            scheduler,
            engine: None,
            window: None,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{:#}", error);
        self.failure = Some(error);
        self.state = AppState::ShouldBeClosed;
        event_loop.exit();
    }

    fn set_state(&mut self, state: AppState) {
        if state != self.state {
            debug!("Application state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state != AppState::Uninitialized {
            return;
        }

        let window = match Window::new(
            event_loop,
            self.config.window_width,
            self.config.window_height,
            &self.config.name,
        ) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, anyhow!("failed to create window: {}", e)),
        };

        match Engine::new(&self.config, &window) {
            Ok(engine) => {
                info!("Initialization complete, entering main loop");
                window.show();
                self.engine = Some(engine);
                self.window = Some(window);
                self.set_state(AppState::Running);
            }
            Err(e) => self.fail(event_loop, anyhow!("failed to initialize engine: {}", e)),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.set_state(AppState::ShouldBeClosed);
                event_loop.exit();
            }
            WindowEvent::Occluded(occluded) => {
                self.set_state(self.state.on_occluded(occluded));
            }
            WindowEvent::RedrawRequested => {
                if !self.state.is_drawing() {
                    return;
                }
                if self.window.as_ref().is_some_and(Window::is_minimized) {
                    return;
                }

                if let Some(engine) = self.engine.as_mut()
                    && let Err(e) = self.scheduler.run_frame(engine)
                {
                    self.fail(event_loop, anyhow!("render loop stopped: {}", e));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.state.is_drawing()
            && let Some(window) = self.window.as_ref()
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.set_state(AppState::Closing);

        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.wait_idle() {
                error!("Failed to wait for device idle on exit: {}", e);
            }
            drop(engine);
        }
        self.window = None;

        info!(
            "Rendered {} frame(s), {} failed",
            self.scheduler.counter().saturating_sub(1),
            self.scheduler.total_failures()
        );
    }
}

fn main() -> Result<()> {
    frametech_core::init_logging();

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!("Application '{}' (version {})", config.name, config.version);
    info!(
        "FPS limit: {}, validation: {}, {} swapchain images",
        config.fps_limit, config.enable_validation, config.buffer_count
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(error) => Err(error),
        None => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occlusion_pauses_and_resumes() {
        assert_eq!(AppState::Running.on_occluded(true), AppState::Paused);
        assert_eq!(AppState::Paused.on_occluded(false), AppState::Running);
        assert_eq!(AppState::Running.on_occluded(false), AppState::Running);
    }

    #[test]
    fn test_occlusion_ignored_outside_the_loop() {
        for state in [
            AppState::Uninitialized,
            AppState::ShouldBeClosed,
            AppState::Closing,
        ] {
            assert_eq!(state.on_occluded(true), state);
            assert_eq!(state.on_occluded(false), state);
        }
    }

    #[test]
    fn test_only_running_draws() {
        assert!(AppState::Running.is_drawing());
        assert!(!AppState::Paused.is_drawing());
        assert!(!AppState::Uninitialized.is_drawing());
        assert!(!AppState::ShouldBeClosed.is_drawing());
    }

    #[test]
    fn test_scheduler_uses_configured_limit() {
        let app = App::new(AppConfig::default());
        assert_eq!(app.scheduler.fps_limit(), AppConfig::default().fps_limit);
        assert_eq!(app.state, AppState::Uninitialized);
        assert!(app.engine.is_none());
    }
}
