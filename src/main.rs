// Demo app for the frameloop lifecycle crate.
//
// Opens a window, drives the begin/end frame sequence, and exercises the
// multi-window path: N opens another window against the same shared device
// manager, F11 toggles fullscreen, Esc quits. No draw work is recorded -
// frames just clear to the configured color, which is all this crate owns.

use anyhow::Result;
use frameloop::{Config, DeviceManager, Drawable, SharedDeviceManager, SurfaceContext};
use parking_lot::Mutex;
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // Logger first: config loading logs where it found its settings
    let config = Config::load();

    log::info!(
        "Starting frameloop demo: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let manager = DeviceManager::new(&config.window.title, config.debug.validation_layers)
        .into_shared();

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, manager);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Window-side half of the collaboration: hands the context its native
/// handles plus the live framebuffer size and clear color queries.
struct DemoWindow {
    window: Arc<Window>,
    clear_color: Mutex<[f32; 4]>,
}

impl HasWindowHandle for DemoWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for DemoWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl Drawable for DemoWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn clear_color(&self) -> [f32; 4] {
        *self.clear_color.lock()
    }
}

struct WindowState {
    drawable: Arc<DemoWindow>,
    context: SurfaceContext,
}

struct App {
    config: Config,
    manager: SharedDeviceManager,
    windows: HashMap<WindowId, WindowState>,
    primary: Option<WindowId>,
    extra_windows: u32,
    is_fullscreen: bool,

    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config, manager: SharedDeviceManager) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            manager,
            windows: HashMap::new(),
            primary: None,
            extra_windows: 0,
            is_fullscreen,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn open_window(
        &mut self,
        event_loop: &ActiveEventLoop,
        title: &str,
        fullscreen: bool,
    ) -> Result<WindowId> {
        let mut attributes = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = Arc::new(event_loop.create_window(attributes)?);
        let id = window.id();

        let drawable = Arc::new(DemoWindow {
            window,
            clear_color: Mutex::new(self.config.graphics.clear_color),
        });

        let context = SurfaceContext::new(
            self.manager.clone(),
            drawable.clone() as Arc<dyn Drawable>,
            self.config.preferred_present_mode(),
        )?;

        {
            let mgr = self.manager.lock();
            log::info!(
                "Window '{}' attached, {} surface(s) on {}",
                title,
                mgr.surface_count(),
                mgr.adapter_name().unwrap_or("<none>")
            );
        }

        self.windows.insert(id, WindowState { drawable, context });
        Ok(id)
    }

    fn toggle_fullscreen(&mut self) {
        let Some(primary) = self.primary.and_then(|id| self.windows.get(&id)) else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            primary
                .drawable
                .window
                .set_fullscreen(Some(Fullscreen::Borderless(None)));
        } else {
            primary.drawable.window.set_fullscreen(None);
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        let fps = self.frame_count as f32 / elapsed;
        if let Some(primary) = self.primary.and_then(|id| self.windows.get(&id)) {
            primary
                .drawable
                .window
                .set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
        }

        self.frame_count = 0;
        self.last_fps_update = now;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.primary.is_some() {
            return;
        }

        let title = self.config.window.title.clone();
        let fullscreen = self.config.window.fullscreen;
        match self.open_window(event_loop, &title, fullscreen) {
            Ok(id) => self.primary = Some(id),
            Err(e) => {
                log::error!("Failed to create primary window: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                // Dropping the context detaches its surface; the device and
                // instance go away with the last one
                self.windows.remove(&id);
                if self.primary == Some(id) || self.windows.is_empty() {
                    event_loop.exit();
                }
            }

            WindowEvent::Resized(size) => {
                if let Some(state) = self.windows.get_mut(&id) {
                    state.context.on_resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(state) = self.windows.get_mut(&id) else {
                    return;
                };

                let rendered = state
                    .context
                    .begin_frame()
                    .and_then(|open| if open { state.context.end_frame().map(|_| true) } else { Ok(false) });

                match rendered {
                    Ok(true) if self.primary == Some(id) => self.update_fps(),
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("Render error: {:#}", e);
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() {
                    return;
                }
                if let PhysicalKey::Code(key) = event.physical_key {
                    match key {
                        KeyCode::Escape => event_loop.exit(),
                        KeyCode::F11 => self.toggle_fullscreen(),
                        KeyCode::KeyN => {
                            self.extra_windows += 1;
                            let title =
                                format!("{} #{}", self.config.window.title, self.extra_windows + 1);
                            if let Err(e) = self.open_window(event_loop, &title, false) {
                                log::error!("Failed to open extra window: {:#}", e);
                            }
                        }
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        for state in self.windows.values() {
            state.drawable.window.request_redraw();
        }
    }
}
