use crate::app::{FrameOutcome, XrApp};
use crate::config::AppConfig;
use crate::platform::{LifecycleSender, LifecycleSignal};
use crate::render::tap_target;
use crate::xr::GraphicsBinding;
use android_activity::input::{InputEvent, MotionAction};
use android_activity::ndk::native_window::NativeWindow;
use android_activity::{AndroidApp, InputStatus, MainEvent, PollEvent};
use khronos_egl as egl;
use std::time::Duration;

const CONFIG_FILE: &str = "xr_overlay.json";

const CONFIG_ATTRIBUTES: [egl::Int; 15] = [
    egl::RED_SIZE,
    8,
    egl::GREEN_SIZE,
    8,
    egl::BLUE_SIZE,
    8,
    egl::ALPHA_SIZE,
    8,
    egl::DEPTH_SIZE,
    16,
    egl::RENDERABLE_TYPE,
    egl::OPENGL_ES2_BIT,
    egl::SURFACE_TYPE,
    egl::WINDOW_BIT,
    egl::NONE,
];

const CONTEXT_ATTRIBUTES: [egl::Int; 3] = [egl::CONTEXT_CLIENT_VERSION, 3, egl::NONE];

/// Process-wide EGL display, shared by every window the activity gets.
struct EglDisplay {
    egl: egl::Instance<egl::Static>,
    display: egl::Display,
    config: egl::Config,
}

impl EglDisplay {
    fn open() -> Result<Self, egl::Error> {
        let egl = egl::Instance::new(egl::Static);
        let display =
            unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }.ok_or(egl::Error::BadDisplay)?;
        let (major, minor) = egl.initialize(display)?;
        let config = egl
            .choose_first_config(display, &CONFIG_ATTRIBUTES)?
            .ok_or(egl::Error::BadConfig)?;
        log::info!("[android] EGL {major}.{minor} initialized");
        Ok(Self {
            egl,
            display,
            config,
        })
    }

    fn attach(&self, window: &NativeWindow) -> Result<EglWindow, egl::Error> {
        let context = self
            .egl
            .create_context(self.display, self.config, None, &CONTEXT_ATTRIBUTES)?;
        let surface = match unsafe {
            self.egl.create_window_surface(
                self.display,
                self.config,
                window.ptr().as_ptr() as egl::NativeWindowType,
                None,
            )
        } {
            Ok(surface) => surface,
            Err(err) => {
                self.destroy_context(context);
                return Err(err);
            }
        };
        let window = EglWindow { context, surface };
        let current = self
            .egl
            .make_current(self.display, Some(surface), Some(surface), Some(context));
        if let Err(err) = current {
            self.release(window);
            return Err(err);
        }
        Ok(window)
    }

    fn binding(&self, window: &EglWindow) -> GraphicsBinding {
        GraphicsBinding::OpenGlEs {
            display: self.display.as_ptr() as usize,
            config: self.config.as_ptr() as usize,
            context: window.context.as_ptr() as usize,
        }
    }

    fn release(&self, window: EglWindow) {
        if let Err(err) = self.egl.make_current(self.display, None, None, None) {
            log::warn!("[android] eglMakeCurrent(none) failed: {err}");
        }
        if let Err(err) = self.egl.destroy_surface(self.display, window.surface) {
            log::warn!("[android] eglDestroySurface failed: {err}");
        }
        self.destroy_context(window.context);
    }

    fn destroy_context(&self, context: egl::Context) {
        if let Err(err) = self.egl.destroy_context(self.display, context) {
            log::warn!("[android] eglDestroyContext failed: {err}");
        }
    }
}

impl Drop for EglDisplay {
    fn drop(&mut self) {
        if let Err(err) = self.egl.terminate(self.display) {
            log::warn!("[android] eglTerminate failed: {err}");
        }
    }
}

struct EglWindow {
    context: egl::Context,
    surface: egl::Surface,
}

/// Activity-side state: turns `android-activity` callbacks into lifecycle
/// signals and owns the EGL objects the session is bound to.
struct Host {
    sender: LifecycleSender,
    display: Option<EglDisplay>,
    window: Option<EglWindow>,
    /// Windows whose session may still reference their context.
    retired: Vec<EglWindow>,
    window_size: (u32, u32),
}

impl Host {
    fn new(sender: LifecycleSender) -> Self {
        Self {
            sender,
            display: None,
            window: None,
            retired: Vec::new(),
            window_size: (0, 0),
        }
    }

    fn handle_event(&mut self, app: &AndroidApp, event: PollEvent<'_>) {
        let PollEvent::Main(event) = event else {
            return;
        };
        match event {
            MainEvent::Resume { .. } => {
                self.sender.send(LifecycleSignal::Resumed);
            }
            MainEvent::Pause => {
                self.sender.send(LifecycleSignal::Paused);
            }
            MainEvent::InitWindow { .. } => self.window_created(app),
            MainEvent::TerminateWindow { .. } => {
                self.sender.send(LifecycleSignal::WindowTerminated);
                self.window_size = (0, 0);
                if let Some(window) = self.window.take() {
                    self.retired.push(window);
                }
            }
            MainEvent::Destroy => {
                self.sender.send(LifecycleSignal::Destroyed);
            }
            _ => {}
        }
    }

    fn window_created(&mut self, app: &AndroidApp) {
        let Some(native) = app.native_window() else {
            log::warn!("[android] InitWindow without a native window");
            return;
        };
        self.window_size = (
            u32::try_from(native.width()).unwrap_or(0),
            u32::try_from(native.height()).unwrap_or(0),
        );

        if self.display.is_none() {
            match EglDisplay::open() {
                Ok(display) => self.display = Some(display),
                Err(err) => {
                    log::error!("[android] EGL display unavailable: {err}");
                    return;
                }
            }
        }
        let Some(display) = self.display.as_ref() else {
            return;
        };
        match display.attach(&native) {
            Ok(window) => {
                let binding = display.binding(&window);
                if let Some(previous) = self.window.replace(window) {
                    self.retired.push(previous);
                }
                log::info!(
                    "[android] window {}x{} ready",
                    self.window_size.0,
                    self.window_size.1
                );
                self.sender.send(LifecycleSignal::WindowInitialized(binding));
            }
            Err(err) => log::error!("[android] EGL window setup failed: {err}"),
        }
    }

    fn handle_input(&mut self, app: &AndroidApp) {
        let (width, height) = self.window_size;
        let mut events = match app.input_events_iter() {
            Ok(events) => events,
            Err(err) => {
                log::warn!("[android] input unavailable: {err:?}");
                return;
            }
        };
        while events.next(|event| match event {
            InputEvent::MotionEvent(motion) if motion.action() == MotionAction::Down => {
                let pointer = motion.pointer_at_index(0);
                tap_target(pointer.x(), pointer.y(), width, height);
                InputStatus::Handled
            }
            _ => InputStatus::Unhandled,
        }) {}
    }

    /// Destroys retired contexts once no session can still be bound to them.
    fn release_retired(&mut self, session_alive: bool) {
        if session_alive || self.retired.is_empty() {
            return;
        }
        if let Some(display) = self.display.as_ref() {
            for window in self.retired.drain(..) {
                display.release(window);
            }
        }
    }

    fn close(mut self) {
        if let Some(display) = self.display.take() {
            for window in self.retired.drain(..).chain(self.window.take()) {
                display.release(window);
            }
        }
    }
}

fn load_config(app: &AndroidApp) -> AppConfig {
    let Some(path) = app.internal_data_path().map(|dir| dir.join(CONFIG_FILE)) else {
        return AppConfig::default();
    };
    if !path.exists() {
        return AppConfig::default();
    }
    match AppConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("[android] ignoring {}: {err}", path.display());
            AppConfig::default()
        }
    }
}

#[unsafe(no_mangle)]
fn android_main(app: AndroidApp) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("xr_overlay"),
    );

    let config = load_config(&app);
    let idle_wait = Duration::from_millis(config.frame.idle_poll_ms);
    let mut xr = match XrApp::from_config(config) {
        Ok(xr) => xr,
        Err(err) => {
            log::error!("[android] failed to build app: {err}");
            return;
        }
    };
    let mut host = Host::new(xr.lifecycle_sender());
    host.sender.send(LifecycleSignal::Created);

    loop {
        // Block briefly while no session runs; never stall a running frame loop.
        let timeout = if xr.session().is_running() {
            Duration::ZERO
        } else {
            idle_wait
        };
        app.poll_events(Some(timeout), |event| host.handle_event(&app, event));
        host.handle_input(&app);

        match xr.run_frame() {
            Ok(FrameOutcome::Exit) => break,
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                log::error!("[android] stopping: {err}");
                break;
            }
            Err(err) => log::warn!("[android] frame error: {err}"),
        }
        host.release_retired(xr.session().session().is_some());
    }

    match xr.exit_reason() {
        Some(reason) => log::info!("[android] exit: {reason}"),
        None => log::info!("[android] exit"),
    }
    xr.shutdown();
    host.close();
}
