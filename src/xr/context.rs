use super::{InstanceInfo, XrRuntime};

/// Process-wide XR state: the loaded runtime and, once created, the instance.
///
/// Created once at startup and handed by reference to the session manager,
/// frame driver, and action mapper.
pub struct XrContext {
    runtime: Box<dyn XrRuntime>,
    instance: Option<InstanceInfo>,
}

impl XrContext {
    pub fn new(runtime: Box<dyn XrRuntime>) -> Self {
        Self {
            runtime,
            instance: None,
        }
    }

    pub fn runtime_label(&self) -> &'static str {
        self.runtime.label()
    }

    pub fn runtime_mut(&mut self) -> &mut dyn XrRuntime {
        self.runtime.as_mut()
    }

    pub fn instance(&self) -> Option<&InstanceInfo> {
        self.instance.as_ref()
    }

    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    pub(crate) fn set_instance(&mut self, info: InstanceInfo) {
        self.instance = Some(info);
    }

    pub(crate) fn take_instance(&mut self) -> Option<InstanceInfo> {
        self.instance.take()
    }
}

impl std::fmt::Debug for XrContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrContext")
            .field("runtime", &self.runtime.label())
            .field("instance", &self.instance)
            .finish()
    }
}
