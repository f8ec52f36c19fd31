//! Loader-backed runtime for Android headsets, bound to OpenGL ES.
//!
//! Native objects stay inside this module; the core sees them through the
//! opaque handle newtypes, allocated from a single counter.

use super::runtime::{
    FrameTiming, InstanceDesc, InstanceInfo, RuntimeActionState, RuntimeError, RuntimeEvent,
    RuntimeResult, SubmittedLayer, SwapchainDesc, SwapchainInfo, XrRuntime,
};
use super::{
    BlendMode, Fov, GraphicsBinding, OverlayPlacement, Pose, ReferenceSpaceKind, SessionHandle,
    SpaceHandle, SwapchainHandle, ViewConfigView, ViewConfigurationKind, ViewPose, XrTime,
};
use crate::input::{ActionKind, ActionSetDesc, ActionValue};
use crate::platform::LOADER_LIBRARY;
use crate::session::SessionState;
use openxr as xr;
use std::collections::HashMap;
use std::time::Duration;

type Gles = xr::OpenGlEs;

enum NativeAction {
    Boolean(xr::Action<bool>),
    Float(xr::Action<f32>),
    Vector2(xr::Action<xr::Vector2f>),
    Pose(xr::Action<xr::Posef>),
}

struct NativeActionSet {
    name: String,
    set: xr::ActionSet,
    actions: HashMap<String, NativeAction>,
}

struct NativeInstance {
    instance: xr::Instance,
    system: xr::SystemId,
    view_configuration: xr::ViewConfigurationType,
    overlay_enabled: bool,
    events: xr::EventDataBuffer,
    /// Bindings are immutable after the first attach, so sets outlive sessions.
    action_sets: Vec<NativeActionSet>,
}

struct NativeSession {
    session: xr::Session<Gles>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<Gles>,
    spaces: HashMap<u64, xr::Space>,
    swapchains: HashMap<u64, xr::Swapchain<Gles>>,
    pose_spaces: HashMap<String, xr::Space>,
}

pub struct OpenXrRuntime {
    entry: Option<xr::Entry>,
    instance: Option<NativeInstance>,
    sessions: HashMap<u64, NativeSession>,
    next_handle: u64,
}

impl Default for OpenXrRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenXrRuntime {
    /// The loader is opened lazily by `create_instance`.
    pub fn new() -> Self {
        Self {
            entry: None,
            instance: None,
            sessions: HashMap::new(),
            next_handle: 1,
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn entry(&mut self) -> RuntimeResult<&xr::Entry> {
        if self.entry.is_none() {
            let entry = unsafe { xr::Entry::load() }
                .map_err(|err| RuntimeError::LoaderMissing(format!("{LOADER_LIBRARY}: {err}")))?;
            entry
                .initialize_android_loader()
                .map_err(|err| RuntimeError::LoaderMissing(format!("loader init: {err}")))?;
            self.entry = Some(entry);
        }
        self.entry
            .as_ref()
            .ok_or_else(|| RuntimeError::LoaderMissing(LOADER_LIBRARY.into()))
    }

    fn native_instance(&mut self, call: &'static str) -> RuntimeResult<&mut NativeInstance> {
        self.instance.as_mut().ok_or(RuntimeError::CallFailed {
            call,
            reason: "no instance".into(),
        })
    }

    fn native_session(
        &mut self,
        call: &'static str,
        session: SessionHandle,
    ) -> RuntimeResult<&mut NativeSession> {
        self.sessions
            .get_mut(&session.0)
            .ok_or(RuntimeError::InvalidHandle {
                call,
                handle: session.0,
            })
    }

    fn session_for_swapchain(
        &mut self,
        call: &'static str,
        swapchain: SwapchainHandle,
    ) -> RuntimeResult<&mut xr::Swapchain<Gles>> {
        self.sessions
            .values_mut()
            .find_map(|native| native.swapchains.get_mut(&swapchain.0))
            .ok_or(RuntimeError::InvalidHandle {
                call,
                handle: swapchain.0,
            })
    }

    /// Creates the session through the raw entry point so the overlay struct can be chained.
    fn create_native_session(
        instance: &NativeInstance,
        binding: &GraphicsBinding,
        overlay: Option<OverlayPlacement>,
    ) -> RuntimeResult<(xr::Session<Gles>, xr::FrameWaiter, xr::FrameStream<Gles>)> {
        let GraphicsBinding::OpenGlEs {
            display,
            config,
            context,
        } = *binding
        else {
            return Err(RuntimeError::CallFailed {
                call: "create_session",
                reason: "OpenGL ES binding required".into(),
            });
        };

        let overlay_info = overlay.map(|placement| xr::sys::SessionCreateInfoOverlayEXTX {
            ty: xr::sys::SessionCreateInfoOverlayEXTX::TYPE,
            next: std::ptr::null(),
            create_flags: xr::OverlaySessionCreateFlagsEXTX::EMPTY,
            session_layers_placement: placement.0,
        });
        let binding_info = xr::sys::GraphicsBindingOpenGLESAndroidKHR {
            ty: xr::sys::GraphicsBindingOpenGLESAndroidKHR::TYPE,
            next: overlay_info
                .as_ref()
                .map_or(std::ptr::null(), |info| info as *const _ as *const _),
            display: display as _,
            config: config as _,
            context: context as _,
        };
        let info = xr::sys::SessionCreateInfo {
            ty: xr::sys::SessionCreateInfo::TYPE,
            next: &binding_info as *const _ as *const _,
            create_flags: xr::SessionCreateFlags::EMPTY,
            system_id: instance.system,
        };

        let mut raw = xr::sys::Session::NULL;
        let result = unsafe {
            (instance.instance.fp().create_session)(instance.instance.as_raw(), &info, &mut raw)
        };
        if result.into_raw() < 0 {
            return Err(map_error("create_session", result));
        }
        Ok(unsafe {
            xr::Session::from_raw(instance.instance.clone(), raw, Box::new(()))
        })
    }

    fn build_action_sets(
        instance: &xr::Instance,
        sets: &[ActionSetDesc],
    ) -> RuntimeResult<Vec<NativeActionSet>> {
        let mut native_sets = Vec::with_capacity(sets.len());
        let mut suggestions: HashMap<String, Vec<(String, String, String)>> = HashMap::new();

        for desc in sets {
            let set = instance
                .create_action_set(&desc.name, &desc.localized_name, desc.priority)
                .map_err(|err| map_error("create_action_set", err))?;
            let mut actions = HashMap::new();
            for action in &desc.actions {
                let paths = action
                    .subaction_paths
                    .iter()
                    .map(|path| instance.string_to_path(path))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| map_error("string_to_path", err))?;
                let native = match action.kind {
                    ActionKind::Boolean => NativeAction::Boolean(
                        set.create_action(&action.name, &action.localized_name, &paths)
                            .map_err(|err| map_error("create_action", err))?,
                    ),
                    ActionKind::Float => NativeAction::Float(
                        set.create_action(&action.name, &action.localized_name, &paths)
                            .map_err(|err| map_error("create_action", err))?,
                    ),
                    ActionKind::Vector2 => NativeAction::Vector2(
                        set.create_action(&action.name, &action.localized_name, &paths)
                            .map_err(|err| map_error("create_action", err))?,
                    ),
                    ActionKind::Pose => NativeAction::Pose(
                        set.create_action(&action.name, &action.localized_name, &paths)
                            .map_err(|err| map_error("create_action", err))?,
                    ),
                };
                actions.insert(action.name.clone(), native);
            }
            for profile in &desc.bindings {
                let entry = suggestions.entry(profile.profile.clone()).or_default();
                for binding in &profile.bindings {
                    entry.push((desc.name.clone(), binding.action.clone(), binding.path.clone()));
                }
            }
            native_sets.push(NativeActionSet {
                name: desc.name.clone(),
                set,
                actions,
            });
        }

        for (profile, entries) in &suggestions {
            let profile_path = instance
                .string_to_path(profile)
                .map_err(|err| map_error("string_to_path", err))?;
            let mut bindings = Vec::with_capacity(entries.len());
            for (set_name, action_name, path) in entries {
                let Some(action) = native_sets
                    .iter()
                    .find(|set| &set.name == set_name)
                    .and_then(|set| set.actions.get(action_name))
                else {
                    continue;
                };
                let Ok(path) = instance.string_to_path(path) else {
                    log::warn!("[openxr] unparsable binding path {path}");
                    continue;
                };
                bindings.push(match action {
                    NativeAction::Boolean(action) => xr::Binding::new(action, path),
                    NativeAction::Float(action) => xr::Binding::new(action, path),
                    NativeAction::Vector2(action) => xr::Binding::new(action, path),
                    NativeAction::Pose(action) => xr::Binding::new(action, path),
                });
            }
            if let Err(err) = instance.suggest_interaction_profile_bindings(profile_path, &bindings)
            {
                log::warn!("[openxr] binding suggestion rejected for {profile}: {err}");
            }
        }
        Ok(native_sets)
    }
}

impl XrRuntime for OpenXrRuntime {
    fn label(&self) -> &'static str {
        "OpenXR"
    }

    fn create_instance(&mut self, desc: &InstanceDesc) -> RuntimeResult<InstanceInfo> {
        let entry = self.entry()?;
        let available = entry
            .enumerate_extensions()
            .map_err(|err| map_error("enumerate_extensions", err))?;
        if !available.khr_opengl_es_enable {
            return Err(RuntimeError::ExtensionMissing("XR_KHR_opengl_es_enable".into()));
        }

        let overlay_enabled = desc.request_overlay && available.extx_overlay;
        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_opengl_es_enable = true;
        extensions.khr_android_create_instance = available.khr_android_create_instance;
        extensions.extx_overlay = overlay_enabled;

        let app_info = xr::ApplicationInfo {
            application_name: &desc.app.application_name,
            application_version: desc.app.application_version,
            engine_name: &desc.app.engine_name,
            engine_version: desc.app.engine_version,
        };
        let instance = entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(|err| map_error("create_instance", err))?;
        let properties = instance
            .properties()
            .map_err(|err| map_error("get_instance_properties", err))?;

        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|err| RuntimeError::SystemUnavailable(err.to_string()))?;
        let system_properties = instance
            .system_properties(system)
            .map_err(|err| map_error("get_system_properties", err))?;
        instance
            .graphics_requirements::<Gles>(system)
            .map_err(|err| map_error("graphics_requirements", err))?;

        let view_configuration = match desc.view_configuration {
            ViewConfigurationKind::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
            ViewConfigurationKind::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
        };
        let views = instance
            .enumerate_view_configuration_views(system, view_configuration)
            .map_err(|err| map_error("enumerate_view_configuration_views", err))?
            .into_iter()
            .map(|view| ViewConfigView {
                recommended_width: view.recommended_image_rect_width,
                recommended_height: view.recommended_image_rect_height,
                max_width: view.max_image_rect_width,
                max_height: view.max_image_rect_height,
                recommended_samples: view.recommended_swapchain_sample_count,
            })
            .collect();
        let blend_modes = instance
            .enumerate_environment_blend_modes(system, view_configuration)
            .map_err(|err| map_error("enumerate_environment_blend_modes", err))?
            .into_iter()
            .filter_map(blend_from_native)
            .collect();

        log::info!(
            "[openxr] {} {} on {}",
            properties.runtime_name,
            properties.runtime_version,
            system_properties.system_name
        );
        let info = InstanceInfo {
            runtime_name: properties.runtime_name,
            system_name: system_properties.system_name,
            vendor_id: system_properties.vendor_id,
            view_configuration: desc.view_configuration,
            views,
            blend_modes,
            overlay_enabled,
            blend_mode: BlendMode::Opaque,
        };
        self.instance = Some(NativeInstance {
            instance,
            system,
            view_configuration,
            overlay_enabled,
            events: xr::EventDataBuffer::new(),
            action_sets: Vec::new(),
        });
        Ok(info)
    }

    fn destroy_instance(&mut self) {
        self.sessions.clear();
        self.instance = None;
    }

    fn poll_event(&mut self) -> RuntimeResult<Option<RuntimeEvent>> {
        let sessions = &self.sessions;
        let Some(native) = self.instance.as_mut() else {
            return Err(RuntimeError::InstanceLost);
        };
        loop {
            let event = native
                .instance
                .poll_event(&mut native.events)
                .map_err(|err| map_error("poll_event", err))?;
            let Some(event) = event else {
                return Ok(None);
            };
            let mapped = match event {
                xr::Event::SessionStateChanged(changed) => {
                    let Some(state) = state_from_native(changed.state()) else {
                        continue;
                    };
                    let (session, time) = (changed.session(), changed.time());
                    RuntimeEvent::SessionStateChanged {
                        session: handle_of(sessions, session),
                        state,
                        time: XrTime(time.as_nanos()),
                    }
                }
                xr::Event::InstanceLossPending(loss) => RuntimeEvent::InstanceLossPending {
                    loss_time: XrTime(loss.loss_time().as_nanos()),
                },
                xr::Event::InteractionProfileChanged(changed) => {
                    RuntimeEvent::InteractionProfileChanged {
                        session: handle_of(sessions, changed.session()),
                    }
                }
                xr::Event::ReferenceSpaceChangePending(pending) => {
                    let Some(kind) = space_from_native(pending.reference_space_type()) else {
                        continue;
                    };
                    RuntimeEvent::ReferenceSpaceChangePending {
                        session: handle_of(sessions, pending.session()),
                        kind,
                    }
                }
                xr::Event::EventsLost(lost) => RuntimeEvent::EventsLost {
                    count: lost.lost_event_count(),
                },
                _ => continue,
            };
            return Ok(Some(mapped));
        }
    }

    fn create_session(
        &mut self,
        binding: &GraphicsBinding,
        overlay: Option<OverlayPlacement>,
    ) -> RuntimeResult<SessionHandle> {
        let native = self.native_instance("create_session")?;
        let overlay = overlay.filter(|_| native.overlay_enabled);
        let (session, waiter, stream) = Self::create_native_session(native, binding, overlay)?;
        let handle = self.allocate();
        self.sessions.insert(
            handle,
            NativeSession {
                session,
                waiter,
                stream,
                spaces: HashMap::new(),
                swapchains: HashMap::new(),
                pose_spaces: HashMap::new(),
            },
        );
        Ok(SessionHandle(handle))
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> RuntimeResult<SpaceHandle> {
        let handle = self.allocate();
        let native = self.native_session("create_reference_space", session)?;
        let space = native
            .session
            .create_reference_space(space_to_native(kind), xr::Posef::IDENTITY)
            .map_err(|err| map_error("create_reference_space", err))?;
        native.spaces.insert(handle, space);
        Ok(SpaceHandle(handle))
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        _view_configuration: ViewConfigurationKind,
    ) -> RuntimeResult<()> {
        let view_configuration = self.native_instance("begin_session")?.view_configuration;
        self.native_session("begin_session", session)?
            .session
            .begin(view_configuration)
            .map(|_| ())
            .map_err(|err| map_error("begin_session", err))
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.native_session("end_session", session)?
            .session
            .end()
            .map(|_| ())
            .map_err(|err| map_error("end_session", err))
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.native_session("request_exit_session", session)?
            .session
            .request_exit()
            .map_err(|err| map_error("request_exit_session", err))
    }

    fn destroy_session(&mut self, session: SessionHandle) {
        // Dropping the wrapper destroys spaces and swapchains before the session.
        self.sessions.remove(&session.0);
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        desc: &SwapchainDesc,
    ) -> RuntimeResult<SwapchainInfo> {
        let handle = self.allocate();
        let native = self.native_session("create_swapchain", session)?;
        let swapchain = native
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                    | xr::SwapchainUsageFlags::SAMPLED,
                format: desc.format.gl_internal_format() as u32,
                sample_count: desc.sample_count,
                width: desc.width,
                height: desc.height,
                face_count: 1,
                array_size: desc.array_size,
                mip_count: 1,
            })
            .map_err(|err| map_error("create_swapchain", err))?;
        let images = swapchain
            .enumerate_images()
            .map_err(|err| map_error("enumerate_swapchain_images", err))?
            .into_iter()
            .map(u64::from)
            .collect();
        native.swapchains.insert(handle, swapchain);
        Ok(SwapchainInfo {
            handle: SwapchainHandle(handle),
            images,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        for native in self.sessions.values_mut() {
            if native.swapchains.remove(&swapchain.0).is_some() {
                return;
            }
        }
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.session_for_swapchain("acquire_swapchain_image", swapchain)?
            .acquire_image()
            .map_err(|err| map_error("acquire_swapchain_image", err))
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: Duration,
    ) -> RuntimeResult<()> {
        let nanos = i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX);
        self.session_for_swapchain("wait_swapchain_image", swapchain)?
            .wait_image(xr::Duration::from_nanos(nanos))
            .map_err(|err| map_error("wait_swapchain_image", err))
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.session_for_swapchain("release_swapchain_image", swapchain)?
            .release_image()
            .map_err(|err| map_error("release_swapchain_image", err))
    }

    /// `xrWaitFrame` has no timeout; the call blocks until the runtime paces the frame.
    fn wait_frame(
        &mut self,
        session: SessionHandle,
        _timeout: Duration,
    ) -> RuntimeResult<FrameTiming> {
        let state = self
            .native_session("wait_frame", session)?
            .waiter
            .wait()
            .map_err(|err| map_error("wait_frame", err))?;
        Ok(FrameTiming {
            predicted_display_time: XrTime(state.predicted_display_time.as_nanos()),
            predicted_display_period: Duration::from_nanos(
                state.predicted_display_period.as_nanos().max(0) as u64,
            ),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.native_session("begin_frame", session)?
            .stream
            .begin()
            .map_err(|err| map_error("begin_frame", err))
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        space: SpaceHandle,
        display_time: XrTime,
    ) -> RuntimeResult<Vec<ViewPose>> {
        let view_configuration = self.native_instance("locate_views")?.view_configuration;
        let native = self.native_session("locate_views", session)?;
        let reference = native.spaces.get(&space.0).ok_or(RuntimeError::InvalidHandle {
            call: "locate_views",
            handle: space.0,
        })?;
        let (_flags, views) = native
            .session
            .locate_views(
                view_configuration,
                xr::Time::from_nanos(display_time.nanos()),
                reference,
            )
            .map_err(|err| map_error("locate_views", err))?;
        Ok(views
            .into_iter()
            .map(|view| ViewPose {
                pose: pose_from_native(view.pose),
                fov: Fov {
                    angle_left: view.fov.angle_left,
                    angle_right: view.fov.angle_right,
                    angle_up: view.fov.angle_up,
                    angle_down: view.fov.angle_down,
                },
            })
            .collect())
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: XrTime,
        blend_mode: BlendMode,
        layers: &[SubmittedLayer],
    ) -> RuntimeResult<()> {
        let native = self.native_session("end_frame", session)?;
        // xrEndFrame must run for every begun frame, so layers with unknown
        // handles are dropped here and reported after the frame is closed.
        let (layers, unknown) = SubmittedLayer::retain_known(
            layers,
            |space| native.spaces.contains_key(&space.0),
            |swapchain| native.swapchains.contains_key(&swapchain.0),
        );
        if let Some(handle) = unknown {
            log::warn!("[openxr] end_frame: dropped layers naming unknown handle {handle}");
        }

        let mut projection_views = Vec::new();
        for layer in &layers {
            if let SubmittedLayer::Projection { views, .. } = layer {
                let mut native_views = Vec::with_capacity(views.len());
                for view in views {
                    let Some(swapchain) = native.swapchains.get(&view.swapchain.0) else {
                        break;
                    };
                    native_views.push(
                        xr::CompositionLayerProjectionView::new()
                            .pose(pose_to_native(&view.pose))
                            .fov(xr::Fovf {
                                angle_left: view.fov.angle_left,
                                angle_right: view.fov.angle_right,
                                angle_up: view.fov.angle_up,
                                angle_down: view.fov.angle_down,
                            })
                            .sub_image(
                                xr::SwapchainSubImage::new()
                                    .swapchain(swapchain)
                                    .image_array_index(view.image_array_index)
                                    .image_rect(rect_to_native(view.image_rect)),
                            ),
                    );
                }
                let complete = native_views.len() == views.len();
                projection_views.push(complete.then_some(native_views));
            }
        }

        let mut projections = Vec::new();
        let mut quads = Vec::new();
        let mut order = Vec::with_capacity(layers.len());
        let mut next_projection = projection_views.iter();
        for layer in &layers {
            match layer {
                SubmittedLayer::Projection { space, .. } => {
                    let Some(Some(views)) = next_projection.next() else {
                        continue;
                    };
                    let Some(space) = native.spaces.get(&space.0) else {
                        continue;
                    };
                    order.push((true, projections.len()));
                    projections.push(
                        xr::CompositionLayerProjection::new()
                            .space(space)
                            .views(views),
                    );
                }
                SubmittedLayer::Quad {
                    space,
                    swapchain,
                    image_rect,
                    pose,
                    size,
                } => {
                    let Some(space) = native.spaces.get(&space.0) else {
                        continue;
                    };
                    let Some(swapchain) = native.swapchains.get(&swapchain.0) else {
                        continue;
                    };
                    order.push((false, quads.len()));
                    quads.push(
                        xr::CompositionLayerQuad::new()
                            .space(space)
                            .eye_visibility(xr::EyeVisibility::BOTH)
                            .sub_image(
                                xr::SwapchainSubImage::new()
                                    .swapchain(swapchain)
                                    .image_rect(rect_to_native(*image_rect)),
                            )
                            .pose(pose_to_native(pose))
                            .size(xr::Extent2Df {
                                width: size[0],
                                height: size[1],
                            }),
                    );
                }
            }
        }
        let refs: Vec<&xr::CompositionLayerBase<'_, Gles>> = order
            .iter()
            .map(|&(projection, index)| {
                if projection {
                    &*projections[index]
                } else {
                    &*quads[index]
                }
            })
            .collect();

        native
            .stream
            .end(
                xr::Time::from_nanos(display_time.nanos()),
                blend_to_native(blend_mode),
                &refs,
            )
            .map_err(|err| map_error("end_frame", err))?;
        match unknown {
            Some(handle) => Err(RuntimeError::InvalidHandle {
                call: "end_frame",
                handle,
            }),
            None => Ok(()),
        }
    }

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        sets: &[ActionSetDesc],
    ) -> RuntimeResult<()> {
        let Some(instance) = self.instance.as_mut() else {
            return Err(RuntimeError::InstanceLost);
        };
        if instance.action_sets.is_empty() {
            instance.action_sets = Self::build_action_sets(&instance.instance, sets)?;
        }
        let native = self
            .sessions
            .get_mut(&session.0)
            .ok_or(RuntimeError::InvalidHandle {
                call: "attach_action_sets",
                handle: session.0,
            })?;

        let refs: Vec<&xr::ActionSet> = instance.action_sets.iter().map(|set| &set.set).collect();
        native
            .session
            .attach_action_sets(&refs)
            .map_err(|err| map_error("attach_action_sets", err))?;

        native.pose_spaces.clear();
        for set in &instance.action_sets {
            for (name, action) in &set.actions {
                if let NativeAction::Pose(action) = action {
                    let space = action
                        .create_space(native.session.clone(), xr::Path::NULL, xr::Posef::IDENTITY)
                        .map_err(|err| map_error("create_action_space", err))?;
                    native.pose_spaces.insert(format!("{}/{name}", set.name), space);
                }
            }
        }
        Ok(())
    }

    /// Reports `true` whenever the call succeeds; focus is tracked by the session state.
    fn sync_actions(&mut self, session: SessionHandle) -> RuntimeResult<bool> {
        let Some(instance) = self.instance.as_ref() else {
            return Err(RuntimeError::InstanceLost);
        };
        let native = self
            .sessions
            .get(&session.0)
            .ok_or(RuntimeError::InvalidHandle {
                call: "sync_actions",
                handle: session.0,
            })?;
        let active: Vec<xr::ActiveActionSet<'_>> = instance
            .action_sets
            .iter()
            .map(|set| xr::ActiveActionSet::new(&set.set))
            .collect();
        native
            .session
            .sync_actions(&active)
            .map_err(|err| map_error("sync_actions", err))?;
        Ok(true)
    }

    fn action_state(
        &mut self,
        session: SessionHandle,
        set: &str,
        action: &str,
        space: SpaceHandle,
        display_time: XrTime,
    ) -> RuntimeResult<RuntimeActionState> {
        let Some(instance) = self.instance.as_ref() else {
            return Err(RuntimeError::InstanceLost);
        };
        let native = self
            .sessions
            .get(&session.0)
            .ok_or(RuntimeError::InvalidHandle {
                call: "action_state",
                handle: session.0,
            })?;
        let native_action = instance
            .action_sets
            .iter()
            .find(|candidate| candidate.name == set)
            .and_then(|candidate| candidate.actions.get(action))
            .ok_or_else(|| RuntimeError::CallFailed {
                call: "action_state",
                reason: format!("unknown action {set}/{action}"),
            })?;
        let failed = |err| map_error("action_state", err);
        let session_ref = &native.session;
        let pose_key = format!("{set}/{action}");

        let state = match native_action {
            NativeAction::Boolean(action) => {
                let state = action.state(session_ref, xr::Path::NULL).map_err(failed)?;
                RuntimeActionState {
                    value: ActionValue::Boolean(state.current_state),
                    is_active: state.is_active,
                    changed_since_last_sync: state.changed_since_last_sync,
                }
            }
            NativeAction::Float(action) => {
                let state = action.state(session_ref, xr::Path::NULL).map_err(failed)?;
                RuntimeActionState {
                    value: ActionValue::Float(state.current_state),
                    is_active: state.is_active,
                    changed_since_last_sync: state.changed_since_last_sync,
                }
            }
            NativeAction::Vector2(action) => {
                let state = action.state(session_ref, xr::Path::NULL).map_err(failed)?;
                RuntimeActionState {
                    value: ActionValue::Vector2([state.current_state.x, state.current_state.y]),
                    is_active: state.is_active,
                    changed_since_last_sync: state.changed_since_last_sync,
                }
            }
            NativeAction::Pose(action) => {
                let is_active = action.is_active(session_ref, xr::Path::NULL).map_err(failed)?;
                let located = match (
                    native.pose_spaces.get(&pose_key),
                    native.spaces.get(&space.0),
                ) {
                    (Some(action_space), Some(base)) if is_active => {
                        let location = action_space
                            .locate(base, xr::Time::from_nanos(display_time.nanos()))
                            .map_err(failed)?;
                        let valid = xr::SpaceLocationFlags::POSITION_VALID
                            | xr::SpaceLocationFlags::ORIENTATION_VALID;
                        location
                            .location_flags
                            .contains(valid)
                            .then(|| pose_from_native(location.pose))
                    }
                    _ => None,
                };
                RuntimeActionState {
                    value: ActionValue::Pose(located),
                    is_active,
                    changed_since_last_sync: true,
                }
            }
        };
        Ok(state)
    }
}

fn handle_of(sessions: &HashMap<u64, NativeSession>, raw: xr::sys::Session) -> SessionHandle {
    sessions
        .iter()
        .find(|(_, native)| native.session.as_raw() == raw)
        .map_or(SessionHandle(0), |(handle, _)| SessionHandle(*handle))
}

fn map_error(call: &'static str, err: xr::sys::Result) -> RuntimeError {
    match err {
        xr::sys::Result::ERROR_SESSION_LOST => RuntimeError::SessionLost,
        xr::sys::Result::ERROR_INSTANCE_LOST => RuntimeError::InstanceLost,
        xr::sys::Result::ERROR_SESSION_NOT_RUNNING => RuntimeError::SessionNotRunning,
        xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE => {
            RuntimeError::SystemUnavailable(err.to_string())
        }
        xr::sys::Result::ERROR_EXTENSION_NOT_PRESENT => {
            RuntimeError::ExtensionMissing(format!("{call}: {err}"))
        }
        xr::sys::Result::ERROR_HANDLE_INVALID => RuntimeError::InvalidHandle { call, handle: 0 },
        other => RuntimeError::CallFailed {
            call,
            reason: other.to_string(),
        },
    }
}

fn state_from_native(state: xr::SessionState) -> Option<SessionState> {
    Some(match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::EXITING => SessionState::Exiting,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        _ => return None,
    })
}

fn space_to_native(kind: ReferenceSpaceKind) -> xr::ReferenceSpaceType {
    match kind {
        ReferenceSpaceKind::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
    }
}

fn space_from_native(kind: xr::ReferenceSpaceType) -> Option<ReferenceSpaceKind> {
    match kind {
        xr::ReferenceSpaceType::VIEW => Some(ReferenceSpaceKind::View),
        xr::ReferenceSpaceType::LOCAL => Some(ReferenceSpaceKind::Local),
        xr::ReferenceSpaceType::STAGE => Some(ReferenceSpaceKind::Stage),
        _ => None,
    }
}

fn blend_from_native(mode: xr::EnvironmentBlendMode) -> Option<BlendMode> {
    match mode {
        xr::EnvironmentBlendMode::OPAQUE => Some(BlendMode::Opaque),
        xr::EnvironmentBlendMode::ADDITIVE => Some(BlendMode::Additive),
        xr::EnvironmentBlendMode::ALPHA_BLEND => Some(BlendMode::AlphaBlend),
        _ => None,
    }
}

fn blend_to_native(mode: BlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        BlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        BlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        BlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

fn pose_from_native(pose: xr::Posef) -> Pose {
    Pose {
        position: [pose.position.x, pose.position.y, pose.position.z],
        orientation: [
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ],
    }
}

fn pose_to_native(pose: &Pose) -> xr::Posef {
    let [px, py, pz] = pose.position;
    let [ox, oy, oz, ow] = pose.orientation;
    xr::Posef {
        orientation: xr::Quaternionf {
            x: ox,
            y: oy,
            z: oz,
            w: ow,
        },
        position: xr::Vector3f {
            x: px,
            y: py,
            z: pz,
        },
    }
}

fn rect_to_native([x, y, width, height]: [i32; 4]) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di { x, y },
        extent: xr::Extent2Di { width, height },
    }
}
