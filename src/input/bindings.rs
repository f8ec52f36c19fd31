use super::{ActionDesc, ActionKind, ActionSetDesc, ProfileBinding, SuggestedBinding};

pub const SIMPLE_CONTROLLER: &str = "/interaction_profiles/khr/simple_controller";
pub const TOUCH_CONTROLLER: &str = "/interaction_profiles/oculus/touch_controller";
pub const INDEX_CONTROLLER: &str = "/interaction_profiles/valve/index_controller";
pub const MOTION_CONTROLLER: &str = "/interaction_profiles/microsoft/motion_controller";
pub const VIVE_CONTROLLER: &str = "/interaction_profiles/htc/vive_controller";

pub const PROFILES: [&str; 5] = [
    SIMPLE_CONTROLLER,
    TOUCH_CONTROLLER,
    INDEX_CONTROLLER,
    MOTION_CONTROLLER,
    VIVE_CONTROLLER,
];

pub const LEFT_HAND: &str = "/user/hand/left";
pub const RIGHT_HAND: &str = "/user/hand/right";
const HANDS: [&str; 2] = [LEFT_HAND, RIGHT_HAND];

pub const DEFAULT_ACTION_SET: &str = "overlay";

/// Controller actions with suggested bindings for the common interaction profiles.
pub fn default_action_set() -> ActionSetDesc {
    let subaction_paths: Vec<String> = HANDS.iter().map(|hand| hand.to_string()).collect();
    let action = |name: &str, localized_name: &str, kind: ActionKind| ActionDesc {
        name: name.into(),
        localized_name: localized_name.into(),
        kind,
        subaction_paths: subaction_paths.clone(),
    };

    ActionSetDesc {
        name: DEFAULT_ACTION_SET.into(),
        localized_name: "Overlay".into(),
        priority: 0,
        actions: vec![
            action("trigger", "Trigger", ActionKind::Float),
            action("trigger_click", "Trigger Click", ActionKind::Boolean),
            action("grip", "Grip", ActionKind::Float),
            action("grip_click", "Grip Click", ActionKind::Boolean),
            action("grip_pose", "Grip Pose", ActionKind::Pose),
            action("thumbstick", "Thumbstick", ActionKind::Vector2),
            action("primary", "Primary", ActionKind::Boolean),
            action("secondary", "Secondary", ActionKind::Boolean),
            action("menu", "Menu", ActionKind::Boolean),
        ],
        bindings: PROFILES.iter().map(|profile| profile_bindings(profile)).collect(),
    }
}

pub fn profile_bindings(profile: &str) -> ProfileBinding {
    let mut bindings = Vec::with_capacity(24);
    macro_rules! bind {
        ($action:expr, $component:expr) => {
            for hand in HANDS {
                bindings.push(SuggestedBinding::new($action, hand, $component));
            }
        };
    }
    macro_rules! bind_hand {
        ($action:expr, $hand:expr, $component:expr) => {
            bindings.push(SuggestedBinding::new($action, $hand, $component));
        };
    }

    match profile {
        SIMPLE_CONTROLLER => {
            bind!("trigger_click", "select/click");
            bind!("primary", "select/click");
            bind!("secondary", "menu/click");
            bind!("menu", "menu/click");
        }
        TOUCH_CONTROLLER => {
            bind!("trigger", "trigger/value");
            bind!("grip", "squeeze/value");
            bind!("thumbstick", "thumbstick");
            bind_hand!("primary", LEFT_HAND, "x/click");
            bind_hand!("primary", RIGHT_HAND, "a/click");
            bind_hand!("secondary", LEFT_HAND, "y/click");
            bind_hand!("secondary", RIGHT_HAND, "b/click");
            bind_hand!("menu", LEFT_HAND, "menu/click");
        }
        INDEX_CONTROLLER => {
            bind!("trigger", "trigger/value");
            bind!("trigger_click", "trigger/click");
            bind!("grip", "squeeze/value");
            bind!("thumbstick", "thumbstick");
            bind!("primary", "a/click");
            bind!("secondary", "b/click");
        }
        MOTION_CONTROLLER => {
            bind!("trigger", "trigger/value");
            bind!("grip_click", "squeeze/click");
            bind!("thumbstick", "thumbstick");
            bind!("thumbstick", "trackpad");
            bind!("primary", "thumbstick/click");
            bind!("primary", "trackpad/click");
            bind!("secondary", "menu/click");
            bind!("menu", "menu/click");
        }
        VIVE_CONTROLLER => {
            bind!("trigger", "trigger/value");
            bind!("trigger_click", "trigger/click");
            bind!("grip_click", "squeeze/click");
            bind!("thumbstick", "trackpad");
            bind!("primary", "trackpad/click");
            bind!("secondary", "menu/click");
            bind!("menu", "menu/click");
        }
        other => log::warn!("[input] no suggested bindings for {other}"),
    }
    if PROFILES.contains(&profile) {
        bind!("grip_pose", "grip/pose");
    }

    ProfileBinding {
        profile: profile.into(),
        bindings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_profile_binds_only_declared_actions() {
        let set = default_action_set();
        assert_eq!(set.bindings.len(), PROFILES.len());
        for profile in &set.bindings {
            assert!(!profile.bindings.is_empty(), "{}", profile.profile);
            for binding in &profile.bindings {
                assert!(
                    set.actions.iter().any(|action| action.name == binding.action),
                    "{} binds unknown action {}",
                    profile.profile,
                    binding.action
                );
                assert!(binding.path.starts_with("/user/hand/"));
            }
        }
    }

    #[test]
    fn touch_controller_splits_face_buttons_per_hand() {
        let touch = profile_bindings(TOUCH_CONTROLLER);
        let primary: Vec<&str> = touch
            .bindings
            .iter()
            .filter(|binding| binding.action == "primary")
            .map(|binding| binding.path.as_str())
            .collect();
        assert_eq!(
            primary,
            vec!["/user/hand/left/input/x/click", "/user/hand/right/input/a/click"]
        );
    }

    #[test]
    fn unknown_profile_has_no_bindings() {
        assert!(profile_bindings("/interaction_profiles/acme/wand").bindings.is_empty());
    }
}
