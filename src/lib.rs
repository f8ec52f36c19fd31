#[cfg(target_os = "android")]
mod android;
pub mod app;
pub mod config;
pub mod frame;
pub mod input;
pub mod platform;
pub mod render;
pub mod session;
pub mod xr;

/// Bootstraps the overlay loop with the default configuration.
///
/// Off-device builds run against the simulated runtime and feed it a headless
/// window so the loop reaches the focused state. On Android the activity
/// enters through `android_main` instead.
pub fn run() {
    let mut app = match app::XrApp::from_config(config::AppConfig::default()) {
        Ok(app) => app,
        Err(err) => {
            log::error!("[app] failed to build: {err}");
            return;
        }
    };

    #[cfg(not(target_os = "android"))]
    {
        let sender = app.lifecycle_sender();
        for signal in [
            platform::LifecycleSignal::Created,
            platform::LifecycleSignal::Resumed,
            platform::LifecycleSignal::WindowInitialized(xr::GraphicsBinding::Headless),
        ] {
            sender.send(signal);
        }
    }

    match app.run(app::DEFAULT_MAX_FRAMES) {
        Ok(Some(reason)) => log::info!("[app] exited: {reason}"),
        Ok(None) => log::info!("[app] frame budget reached"),
        Err(err) => log::error!("[app] stopped: {err}"),
    }
    app.shutdown();
}
