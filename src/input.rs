// SPDX-License-Identifier: GPL-3.0-only

//! Input Handler
//!
//! Keys map to [`InputAction`]s through a configurable binding table; the
//! actions mutate the display state, the pipeline options and the camera.
//! Mouse drags rotate (left button) or pan (right button) the camera, and
//! scrolling dollies it (zooms the field of view with Ctrl held).
//! Option values are clamped to their ranges, never rejected.

use crate::constants::camera::{DOLLY_STEP_M, FOVY_STEP_DEG};
use crate::constants::pipeline::*;
use crate::errors::ConfigError;
use crate::render::{Camera, DisplayMode, DisplayState};
use crate::tracker::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// What a key press does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputAction {
    SelectMode(DisplayMode),
    CycleFilter,
    ToggleNormalMode,
    ToggleWireframe,
    TogglePoints,
    TogglePause,
    ResetCamera,
    IncreaseMaxDepth,
    DecreaseMaxDepth,
    IncreaseSpatialSigma,
    DecreaseSpatialSigma,
    IncreaseDepthSigma,
    DecreaseDepthSigma,
    Quit,
}

impl InputAction {
    /// Short name shown in the help line
    pub fn label(&self) -> String {
        match self {
            InputAction::SelectMode(mode) => mode.id().to_string(),
            InputAction::CycleFilter => "filter".to_string(),
            InputAction::ToggleNormalMode => "normals".to_string(),
            InputAction::ToggleWireframe => "wireframe".to_string(),
            InputAction::TogglePoints => "points".to_string(),
            InputAction::TogglePause => "pause".to_string(),
            InputAction::ResetCamera => "reset camera".to_string(),
            InputAction::IncreaseMaxDepth => "depth+".to_string(),
            InputAction::DecreaseMaxDepth => "depth-".to_string(),
            InputAction::IncreaseSpatialSigma => "spatial+".to_string(),
            InputAction::DecreaseSpatialSigma => "spatial-".to_string(),
            InputAction::IncreaseDepthSigma => "sigma+".to_string(),
            InputAction::DecreaseDepthSigma => "sigma-".to_string(),
            InputAction::Quit => "quit".to_string(),
        }
    }
}

/// Key-to-action table, keyed by single characters (`" "` is the space bar)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyBindings(pub BTreeMap<String, InputAction>);

impl Default for KeyBindings {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        let modes = [
            ('1', DisplayMode::Overlay),
            ('2', DisplayMode::Depth),
            ('3', DisplayMode::Image),
            ('4', DisplayMode::HistogramCompare),
            ('5', DisplayMode::VmapDebug),
            ('6', DisplayMode::NmapDebug),
            ('7', DisplayMode::SegmentationDebug),
            ('8', DisplayMode::ProjectionDebug),
            ('9', DisplayMode::Quadtree),
            ('0', DisplayMode::None),
        ];
        for (key, mode) in modes {
            map.insert(key.to_string(), InputAction::SelectMode(mode));
        }
        let options = [
            ('f', InputAction::CycleFilter),
            ('n', InputAction::ToggleNormalMode),
            ('w', InputAction::ToggleWireframe),
            ('p', InputAction::TogglePoints),
            (' ', InputAction::TogglePause),
            ('r', InputAction::ResetCamera),
            ('+', InputAction::IncreaseMaxDepth),
            ('-', InputAction::DecreaseMaxDepth),
            (']', InputAction::IncreaseSpatialSigma),
            ('[', InputAction::DecreaseSpatialSigma),
            ('}', InputAction::IncreaseDepthSigma),
            ('{', InputAction::DecreaseDepthSigma),
            ('q', InputAction::Quit),
        ];
        for (key, action) in options {
            map.insert(key.to_string(), action);
        }
        Self(map)
    }
}

impl KeyBindings {
    /// Every key must be exactly one character
    pub fn validate(&self) -> Result<(), ConfigError> {
        for key in self.0.keys() {
            if key.chars().count() != 1 {
                return Err(ConfigError::Parse(format!(
                    "key binding '{}' must be a single character",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Result of handling one input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// Event not bound to anything
    Ignored,
    /// Display state or camera changed
    Handled,
    /// Pipeline options changed; the tracker must be told
    OptionsChanged,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// State the handler is allowed to mutate
pub struct Controls<'a> {
    pub display: &'a mut DisplayState,
    pub options: &'a mut PipelineOptions,
    pub camera: &'a mut Camera,
    /// Planes currently detected, for plane cycling
    pub plane_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    button: MouseButton,
    last: (f32, f32),
}

/// Translates key and mouse events into state changes
#[derive(Debug, Clone)]
pub struct InputHandler {
    bindings: HashMap<char, InputAction>,
    drag: Option<Drag>,
}

impl Default for InputHandler {
    fn default() -> Self {
        Self::from_bindings(&KeyBindings::default())
    }
}

impl InputHandler {
    /// Handler for `bindings`; keys that are not single characters are skipped
    pub fn from_bindings(bindings: &KeyBindings) -> Self {
        let bindings = bindings
            .0
            .iter()
            .filter_map(|(key, action)| {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some((c, *action)),
                    _ => None,
                }
            })
            .collect();
        Self {
            bindings,
            drag: None,
        }
    }

    pub fn action_for(&self, key: char) -> Option<InputAction> {
        self.bindings.get(&key).copied()
    }

    pub fn key(&self, key: char, controls: Controls<'_>) -> InputOutcome {
        match self.action_for(key) {
            Some(action) => {
                debug!(key = %key, ?action, "Key pressed");
                Self::apply(action, controls)
            }
            None => InputOutcome::Ignored,
        }
    }

    pub fn apply(action: InputAction, controls: Controls<'_>) -> InputOutcome {
        let Controls {
            display,
            options,
            camera,
            plane_count,
        } = controls;

        match action {
            InputAction::SelectMode(mode) => {
                display.select(mode, plane_count);
                InputOutcome::Handled
            }
            InputAction::ToggleWireframe => {
                display.wireframe = !display.wireframe;
                InputOutcome::Handled
            }
            InputAction::TogglePoints => {
                display.points = !display.points;
                InputOutcome::Handled
            }
            InputAction::TogglePause => {
                display.paused = !display.paused;
                InputOutcome::Handled
            }
            InputAction::ResetCamera => {
                camera.reset();
                InputOutcome::Handled
            }
            InputAction::Quit => InputOutcome::Quit,
            InputAction::CycleFilter => {
                options.filter_mode = options.filter_mode.next();
                InputOutcome::OptionsChanged
            }
            InputAction::ToggleNormalMode => {
                options.normal_mode = options.normal_mode.toggled();
                InputOutcome::OptionsChanged
            }
            InputAction::IncreaseMaxDepth | InputAction::DecreaseMaxDepth => {
                let step = signed_step(action == InputAction::IncreaseMaxDepth, MAX_DEPTH_STEP_M);
                options.max_depth = step_clamped(options.max_depth, step, MAX_DEPTH_RANGE_M);
                InputOutcome::OptionsChanged
            }
            InputAction::IncreaseSpatialSigma | InputAction::DecreaseSpatialSigma => {
                let step = signed_step(
                    action == InputAction::IncreaseSpatialSigma,
                    SPATIAL_SIGMA_STEP,
                );
                options.spatial_sigma =
                    step_clamped(options.spatial_sigma, step, SPATIAL_SIGMA_RANGE);
                InputOutcome::OptionsChanged
            }
            InputAction::IncreaseDepthSigma | InputAction::DecreaseDepthSigma => {
                let step =
                    signed_step(action == InputAction::IncreaseDepthSigma, DEPTH_SIGMA_STEP);
                options.depth_sigma = step_clamped(options.depth_sigma, step, DEPTH_SIGMA_RANGE);
                InputOutcome::OptionsChanged
            }
        }
    }

    pub fn mouse_down(&mut self, button: MouseButton, x: f32, y: f32) {
        self.drag = Some(Drag {
            button,
            last: (x, y),
        });
    }

    /// Rotate or pan by the movement since the last mouse event
    pub fn mouse_drag(&mut self, x: f32, y: f32, camera: &mut Camera) -> InputOutcome {
        let Some(drag) = self.drag.as_mut() else {
            return InputOutcome::Ignored;
        };
        let (dx, dy) = (x - drag.last.0, y - drag.last.1);
        drag.last = (x, y);
        match drag.button {
            MouseButton::Left => camera.rotate(dx, dy),
            MouseButton::Right => camera.pan(dx, dy),
        }
        InputOutcome::Handled
    }

    pub fn mouse_up(&mut self) {
        self.drag = None;
    }

    /// `steps` wheel steps, positive away from the user
    pub fn scroll(&self, steps: f32, zoom: bool, camera: &mut Camera) -> InputOutcome {
        if zoom {
            camera.set_fovy(camera.fovy_deg - steps * FOVY_STEP_DEG);
        } else {
            camera.dolly(steps * DOLLY_STEP_M);
        }
        InputOutcome::Handled
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }
}

fn signed_step(increase: bool, step: f32) -> f32 {
    if increase { step } else { -step }
}

fn step_clamped(value: f32, step: f32, range: (f32, f32)) -> f32 {
    (value + step).clamp(range.0, range.1)
}
