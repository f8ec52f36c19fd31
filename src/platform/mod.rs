use crate::xr::{GraphicsBinding, XrError};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

pub const LOADER_LIBRARY: &str = "libopenxr_loader.so";

/// OS lifecycle callbacks, forwarded from the activity thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Created,
    Resumed,
    WindowInitialized(GraphicsBinding),
    WindowTerminated,
    Paused,
    Destroyed,
}

impl LifecycleSignal {
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleSignal::Created => "created",
            LifecycleSignal::Resumed => "resumed",
            LifecycleSignal::WindowInitialized(_) => "window-initialized",
            LifecycleSignal::WindowTerminated => "window-terminated",
            LifecycleSignal::Paused => "paused",
            LifecycleSignal::Destroyed => "destroyed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The application or the OS asked the process to finish.
    Requested,
    /// The runtime moved the session to `Exiting` on its own.
    RuntimeExit,
    UnsupportedDevice(String),
    Fatal(String),
}

impl ExitReason {
    pub fn is_error(&self) -> bool {
        matches!(self, ExitReason::UnsupportedDevice(_) | ExitReason::Fatal(_))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Requested => f.write_str("exit requested"),
            ExitReason::RuntimeExit => f.write_str("runtime ended the session"),
            ExitReason::UnsupportedDevice(reason) => write!(f, "unsupported device: {reason}"),
            ExitReason::Fatal(reason) => write!(f, "fatal XR error: {reason}"),
        }
    }
}

/// Cloneable handle the OS callback thread uses to queue lifecycle signals.
#[derive(Debug, Clone)]
pub struct LifecycleSender {
    tx: Sender<LifecycleSignal>,
}

impl LifecycleSender {
    /// Returns `false` once the bridge has been dropped.
    pub fn send(&self, signal: LifecycleSignal) -> bool {
        match self.tx.send(signal) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("[platform] dropped {} signal: bridge closed", err.0.label());
                false
            }
        }
    }
}

/// Receiving side of the lifecycle channel, owned by the frame loop. Window
/// and resume state live in the session manager, which consumes the drained
/// signals.
pub struct PlatformBridge {
    rx: Receiver<LifecycleSignal>,
    exit_reason: Option<ExitReason>,
    delivered: u64,
}

impl PlatformBridge {
    pub fn new() -> (Self, LifecycleSender) {
        let (tx, rx) = mpsc::channel();
        let bridge = Self {
            rx,
            exit_reason: None,
            delivered: 0,
        };
        (bridge, LifecycleSender { tx })
    }

    /// Takes every queued signal in delivery order. Only called at the top
    /// of the frame loop.
    pub fn drain(&mut self) -> Vec<LifecycleSignal> {
        let mut signals = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(signal) => {
                    self.apply(&signal);
                    signals.push(signal);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.delivered += signals.len() as u64;
        signals
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit_reason.as_ref()
    }

    pub fn record_exit(&mut self, reason: ExitReason) {
        match &self.exit_reason {
            Some(existing) if existing.is_error() => {}
            _ => self.exit_reason = Some(reason),
        }
    }

    /// Turns a fatal XR error into the process exit reason.
    pub fn report_fatal(&mut self, err: &XrError) -> ExitReason {
        let reason = match err {
            XrError::RuntimeUnavailable(reason) => ExitReason::UnsupportedDevice(reason.clone()),
            other => ExitReason::Fatal(other.to_string()),
        };
        log::error!("[platform] {reason}");
        self.record_exit(reason.clone());
        reason
    }

    fn apply(&mut self, signal: &LifecycleSignal) {
        log::debug!("[platform] {}", signal.label());
        if *signal == LifecycleSignal::Destroyed {
            self.record_exit(ExitReason::Requested);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAbi {
    ArmeabiV7a,
    Arm64V8a,
    X86,
    X86_64,
}

impl TargetAbi {
    /// ABIs the application is packaged for; the loader ships only for these.
    pub const PACKAGED: [TargetAbi; 2] = [TargetAbi::ArmeabiV7a, TargetAbi::Arm64V8a];

    pub fn current() -> Option<TargetAbi> {
        if cfg!(target_arch = "arm") {
            Some(TargetAbi::ArmeabiV7a)
        } else if cfg!(target_arch = "aarch64") {
            Some(TargetAbi::Arm64V8a)
        } else if cfg!(target_arch = "x86") {
            Some(TargetAbi::X86)
        } else if cfg!(target_arch = "x86_64") {
            Some(TargetAbi::X86_64)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetAbi::ArmeabiV7a => "armeabi-v7a",
            TargetAbi::Arm64V8a => "arm64-v8a",
            TargetAbi::X86 => "x86",
            TargetAbi::X86_64 => "x86_64",
        }
    }

    pub fn is_packaged(self) -> bool {
        Self::PACKAGED.contains(&self)
    }

    /// On Android, only packaged ABIs may load the OpenXR loader. Returns the
    /// reason initialization must be refused, if any.
    pub fn loader_restriction() -> Option<String> {
        if !cfg!(target_os = "android") || cfg!(xr_packaged_abi) {
            return None;
        }
        let abi = Self::current().map_or("unknown", TargetAbi::name);
        Some(format!("ABI {abi} is not packaged with {LOADER_LIBRARY}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_delivery_order() {
        let (mut bridge, sender) = PlatformBridge::new();
        let worker = sender.clone();
        std::thread::spawn(move || {
            worker.send(LifecycleSignal::Created);
            worker.send(LifecycleSignal::Resumed);
        })
        .join()
        .expect("sender thread");
        sender.send(LifecycleSignal::WindowInitialized(GraphicsBinding::Headless));

        assert_eq!(
            bridge.drain(),
            vec![
                LifecycleSignal::Created,
                LifecycleSignal::Resumed,
                LifecycleSignal::WindowInitialized(GraphicsBinding::Headless),
            ]
        );
        assert!(bridge.drain().is_empty());
        assert_eq!(bridge.delivered(), 3);
    }

    #[test]
    fn destroy_signal_records_requested_exit() {
        let (mut bridge, sender) = PlatformBridge::new();
        sender.send(LifecycleSignal::Paused);
        assert_eq!(bridge.drain(), vec![LifecycleSignal::Paused]);
        assert_eq!(bridge.exit_reason(), None);

        sender.send(LifecycleSignal::Destroyed);
        bridge.drain();
        assert_eq!(bridge.exit_reason(), Some(&ExitReason::Requested));
    }

    #[test]
    fn send_after_bridge_dropped_reports_false() {
        let (bridge, sender) = PlatformBridge::new();
        drop(bridge);
        assert!(!sender.send(LifecycleSignal::Paused));
    }

    #[test]
    fn unavailable_runtime_maps_to_unsupported_device() {
        let (mut bridge, _sender) = PlatformBridge::new();
        let reason = bridge.report_fatal(&XrError::RuntimeUnavailable("no loader".into()));
        assert_eq!(reason, ExitReason::UnsupportedDevice("no loader".into()));

        bridge.record_exit(ExitReason::Requested);
        assert_eq!(bridge.exit_reason(), Some(&reason));
    }

    #[test]
    fn instance_loss_maps_to_fatal() {
        let (mut bridge, _sender) = PlatformBridge::new();
        let reason = bridge.report_fatal(&XrError::InstanceLost("gone".into()));
        assert!(matches!(reason, ExitReason::Fatal(_)));
        assert!(reason.is_error());
    }

    #[test]
    fn only_arm_abis_are_packaged() {
        assert!(TargetAbi::ArmeabiV7a.is_packaged());
        assert!(TargetAbi::Arm64V8a.is_packaged());
        assert!(!TargetAbi::X86_64.is_packaged());
        assert_eq!(TargetAbi::Arm64V8a.name(), "arm64-v8a");
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn host_builds_are_not_restricted() {
        assert_eq!(TargetAbi::loader_restriction(), None);
    }
}
