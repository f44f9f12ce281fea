// SPDX-License-Identifier: GPL-3.0-only

//! Capture settings model
//!
//! Typed capture settings, the static characteristics of the emulated camera,
//! and [`EmulatedRequestState`] which turns per-request settings into sensor
//! parameters and per-frame results.

use super::types::{PipelineResult, RequestTemplate, SensorSettings};
use crate::constants::{
    DEFAULT_EXPOSURE_TIME_NS, DEFAULT_SENSITIVITY, PARTIAL_RESULT_COUNT,
    SUPPORTED_EXPOSURE_TIME_RANGE_NS, SUPPORTED_FRAME_DURATION_RANGE_NS,
    SUPPORTED_SENSITIVITY_RANGE,
};
use crate::errors::{ProcessorError, ProcessorResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureIntent {
    Custom,
    Preview,
    StillCapture,
    VideoRecord,
    VideoSnapshot,
    ZeroShutterLag,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMode {
    Off,
    Auto,
    UseSceneMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeMode {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AwbMode {
    Off,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfMode {
    Off,
    Auto,
    ContinuousPicture,
}

/// Auto exposure state reported in results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AeState {
    #[default]
    Inactive,
    Searching,
    Converged,
    Locked,
}

/// Target frame rate range in frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: i32,
    pub max: i32,
}

/// Device capabilities advertised in the static characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    BackwardCompatible,
    ManualSensor,
    ReadSensorSettings,
    Raw,
    DepthOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareLevel {
    Limited,
    Full,
    Level3,
    External,
}

impl HardwareLevel {
    fn is_supported(&self) -> bool {
        matches!(self, HardwareLevel::Limited | HardwareLevel::Full)
    }
}

/// Per-request capture settings
///
/// Absent fields leave the corresponding control unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_intent: Option<CaptureIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_mode: Option<ControlMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ae_mode: Option<AeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awb_mode: Option<AwbMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub af_mode: Option<AfMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ae_target_fps_range: Option<FpsRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_duration_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<i32>,
    /// Result only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ae_state: Option<AeState>,
}

/// Static characteristics of the emulated camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCharacteristics {
    pub capabilities: Vec<Capability>,
    pub max_pipeline_depth: u8,
    pub hardware_level: HardwareLevel,
    pub available_control_modes: Vec<ControlMode>,
    pub available_ae_modes: Vec<AeMode>,
    pub available_awb_modes: Vec<AwbMode>,
    pub available_af_modes: Vec<AfMode>,
    pub available_fps_ranges: Vec<FpsRange>,
    pub sensitivity_range: (i32, i32),
    pub exposure_time_range_ns: (u64, u64),
    pub max_frame_duration_ns: u64,
}

impl Default for StaticCharacteristics {
    /// A full-level back camera supporting manual sensor control
    fn default() -> Self {
        Self {
            capabilities: vec![
                Capability::BackwardCompatible,
                Capability::ManualSensor,
                Capability::ReadSensorSettings,
            ],
            max_pipeline_depth: crate::constants::PIPELINE_DEPTH as u8,
            hardware_level: HardwareLevel::Full,
            available_control_modes: vec![ControlMode::Off, ControlMode::Auto],
            available_ae_modes: vec![AeMode::Off, AeMode::On],
            available_awb_modes: vec![AwbMode::Off, AwbMode::Auto],
            available_af_modes: vec![AfMode::Off],
            available_fps_ranges: vec![FpsRange { min: 15, max: 30 }, FpsRange { min: 30, max: 30 }],
            sensitivity_range: SUPPORTED_SENSITIVITY_RANGE,
            exposure_time_range_ns: SUPPORTED_EXPOSURE_TIME_RANGE_NS,
            max_frame_duration_ns: SUPPORTED_FRAME_DURATION_RANGE_NS.1,
        }
    }
}

impl StaticCharacteristics {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Settings/metadata collaborator of the request processor
pub trait RequestState: Send {
    /// Validate static characteristics and build the default request templates
    fn initialize(&mut self, characteristics: StaticCharacteristics) -> ProcessorResult<()>;

    /// Clone of the default settings for `template`
    fn default_request(&self, template: RequestTemplate) -> ProcessorResult<CaptureSettings>;

    /// Apply request settings and derive the sensor parameters for the frame
    fn sensor_settings(&mut self, settings: &CaptureSettings) -> ProcessorResult<SensorSettings>;

    /// Create the result record for a frame about to be dispatched
    fn initialize_result(
        &self,
        pipeline_id: u32,
        frame_number: u32,
        settings: &CaptureSettings,
    ) -> PipelineResult;
}

const TEMPLATE_COUNT: usize = RequestTemplate::ALL.len();

/// Request state of the emulated camera
#[derive(Debug)]
pub struct EmulatedRequestState {
    camera_id: u32,
    characteristics: Option<StaticCharacteristics>,
    default_requests: [Option<CaptureSettings>; TEMPLATE_COUNT],
    control_mode: ControlMode,
    ae_mode: AeMode,
    awb_mode: AwbMode,
    af_mode: AfMode,
    ae_state: AeState,
    ae_target_fps: FpsRange,
    exposure_time_ns: u64,
    frame_duration_ns: u64,
    sensitivity: i32,
}

impl EmulatedRequestState {
    pub fn new(camera_id: u32) -> Self {
        Self {
            camera_id,
            characteristics: None,
            default_requests: Default::default(),
            control_mode: ControlMode::Auto,
            ae_mode: AeMode::On,
            awb_mode: AwbMode::Auto,
            af_mode: AfMode::Off,
            ae_state: AeState::Inactive,
            ae_target_fps: FpsRange { min: 30, max: 30 },
            exposure_time_ns: DEFAULT_EXPOSURE_TIME_NS,
            frame_duration_ns: crate::constants::DEFAULT_FRAME_DURATION_NS,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }

    fn characteristics(&self) -> ProcessorResult<&StaticCharacteristics> {
        self.characteristics
            .as_ref()
            .ok_or_else(|| ProcessorError::InvalidState("request state not initialized".into()))
    }

    fn validate(characteristics: &StaticCharacteristics) -> ProcessorResult<()> {
        if characteristics.capabilities.is_empty() {
            return Err(ProcessorError::InvalidArgument(
                "no available capabilities".into(),
            ));
        }
        if characteristics.max_pipeline_depth == 0 {
            return Err(ProcessorError::InvalidArgument(
                "maximum pipeline depth must be non-zero".into(),
            ));
        }
        if !characteristics.hardware_level.is_supported() {
            return Err(ProcessorError::InvalidArgument(format!(
                "hardware level {:?} not supported",
                characteristics.hardware_level
            )));
        }
        if characteristics.available_fps_ranges.is_empty() {
            return Err(ProcessorError::InvalidArgument(
                "no available fps ranges".into(),
            ));
        }
        if characteristics.available_control_modes.is_empty()
            || characteristics.available_ae_modes.is_empty()
            || characteristics.available_awb_modes.is_empty()
            || characteristics.available_af_modes.is_empty()
        {
            return Err(ProcessorError::InvalidArgument(
                "3A mode lists must not be empty".into(),
            ));
        }
        let (min_iso, max_iso) = characteristics.sensitivity_range;
        if min_iso >= max_iso || !(min_iso..=max_iso).contains(&DEFAULT_SENSITIVITY) {
            return Err(ProcessorError::InvalidArgument(
                "unsupported sensitivity range".into(),
            ));
        }
        let (min_exp, max_exp) = characteristics.exposure_time_range_ns;
        if min_exp >= max_exp {
            return Err(ProcessorError::InvalidArgument(
                "unsupported exposure time range".into(),
            ));
        }
        Ok(())
    }

    fn build_default_requests(&mut self, characteristics: &StaticCharacteristics) {
        let mut templates: Vec<RequestTemplate> = Vec::new();
        if characteristics.supports(Capability::ManualSensor) {
            templates.push(RequestTemplate::Manual);
        }
        if characteristics.supports(Capability::BackwardCompatible) {
            templates.extend([
                RequestTemplate::Preview,
                RequestTemplate::StillCapture,
                RequestTemplate::VideoRecord,
                RequestTemplate::VideoSnapshot,
            ]);
        }

        let fps = characteristics.available_fps_ranges[0];
        self.default_requests = Default::default();
        for template in templates {
            let mut settings = CaptureSettings {
                control_mode: Some(ControlMode::Auto),
                ae_mode: Some(AeMode::On),
                awb_mode: Some(AwbMode::Auto),
                af_mode: Some(AfMode::Off),
                ae_target_fps_range: Some(fps),
                ..Default::default()
            };
            settings.capture_intent = Some(match template {
                RequestTemplate::Manual => {
                    settings.control_mode = Some(ControlMode::Off);
                    settings.ae_mode = Some(AeMode::Off);
                    settings.awb_mode = Some(AwbMode::Off);
                    CaptureIntent::Manual
                }
                RequestTemplate::Preview => CaptureIntent::Preview,
                RequestTemplate::StillCapture => CaptureIntent::StillCapture,
                RequestTemplate::VideoRecord => CaptureIntent::VideoRecord,
                RequestTemplate::VideoSnapshot => CaptureIntent::VideoSnapshot,
                RequestTemplate::ZeroShutterLag => CaptureIntent::ZeroShutterLag,
            });
            self.default_requests[template.index()] = Some(settings);
        }
    }

    fn check_mode<T: PartialEq + std::fmt::Debug>(
        name: &str,
        requested: Option<T>,
        available: &[T],
    ) -> ProcessorResult<Option<T>> {
        match requested {
            Some(mode) if !available.contains(&mode) => {
                error!(mode = ?mode, "{} mode not supported", name);
                Err(ProcessorError::InvalidArgument(format!(
                    "{} mode {:?} not supported",
                    name, mode
                )))
            }
            other => Ok(other),
        }
    }

    /// Derive exposure parameters from the current AE configuration
    fn process_ae(&mut self, settings: &CaptureSettings, chars: &StaticCharacteristics) {
        let manual = self.control_mode == ControlMode::Off || self.ae_mode == AeMode::Off;
        let (min_exp, max_exp) = chars.exposure_time_range_ns;
        let (min_iso, max_iso) = chars.sensitivity_range;
        let max_frame = chars.max_frame_duration_ns;

        if manual {
            if let Some(exposure) = settings.exposure_time_ns {
                self.exposure_time_ns = exposure.clamp(min_exp, max_exp);
            }
            if let Some(duration) = settings.frame_duration_ns {
                self.frame_duration_ns =
                    duration.clamp(SUPPORTED_FRAME_DURATION_RANGE_NS.0, max_frame);
            }
            if let Some(iso) = settings.sensitivity {
                self.sensitivity = iso.clamp(min_iso, max_iso);
            }
            self.ae_state = AeState::Inactive;
        } else {
            let max_fps = self.ae_target_fps.max.max(1) as u64;
            self.frame_duration_ns = (1_000_000_000 / max_fps)
                .clamp(SUPPORTED_FRAME_DURATION_RANGE_NS.0, max_frame);
            self.exposure_time_ns = DEFAULT_EXPOSURE_TIME_NS
                .clamp(min_exp, max_exp)
                .min(self.frame_duration_ns);
            self.sensitivity = DEFAULT_SENSITIVITY.clamp(min_iso, max_iso);
            self.ae_state = AeState::Converged;
        }

        // Exposure may never outlast the frame
        if self.exposure_time_ns > self.frame_duration_ns {
            self.frame_duration_ns = self.exposure_time_ns.min(max_frame);
        }
    }
}

impl RequestState for EmulatedRequestState {
    fn initialize(&mut self, characteristics: StaticCharacteristics) -> ProcessorResult<()> {
        Self::validate(&characteristics).inspect_err(|e| {
            error!(error = %e, "Static characteristics rejected");
        })?;

        if characteristics.max_pipeline_depth as usize > crate::constants::PIPELINE_DEPTH {
            warn!(
                max_pipeline_depth = characteristics.max_pipeline_depth,
                "Advertised pipeline depth exceeds admission capacity"
            );
        }

        self.build_default_requests(&characteristics);
        self.ae_target_fps = characteristics.available_fps_ranges[0];
        self.control_mode = ControlMode::Auto;
        self.ae_mode = AeMode::On;
        self.awb_mode = AwbMode::Auto;
        self.af_mode = AfMode::Off;
        self.ae_state = AeState::Inactive;
        self.characteristics = Some(characteristics);

        debug!(camera_id = self.camera_id, "Request state initialized");
        Ok(())
    }

    fn default_request(&self, template: RequestTemplate) -> ProcessorResult<CaptureSettings> {
        self.characteristics()?;
        self.default_requests[template.index()]
            .clone()
            .ok_or_else(|| {
                ProcessorError::InvalidArgument(format!(
                    "request template {:?} not supported",
                    template
                ))
            })
    }

    fn sensor_settings(&mut self, settings: &CaptureSettings) -> ProcessorResult<SensorSettings> {
        let chars = self.characteristics()?.clone();

        if let Some(mode) =
            Self::check_mode("control", settings.control_mode, &chars.available_control_modes)?
        {
            self.control_mode = mode;
        }
        if let Some(mode) = Self::check_mode("AE", settings.ae_mode, &chars.available_ae_modes)? {
            self.ae_mode = mode;
        }
        if let Some(mode) = Self::check_mode("AWB", settings.awb_mode, &chars.available_awb_modes)?
        {
            self.awb_mode = mode;
        }
        if let Some(mode) = Self::check_mode("AF", settings.af_mode, &chars.available_af_modes)? {
            self.af_mode = mode;
        }
        if let Some(range) = Self::check_mode(
            "AE target fps",
            settings.ae_target_fps_range,
            &chars.available_fps_ranges,
        )? {
            self.ae_target_fps = range;
        }

        self.process_ae(settings, &chars);

        Ok(SensorSettings {
            exposure_time_ns: self.exposure_time_ns,
            frame_duration_ns: self.frame_duration_ns,
            sensitivity: self.sensitivity,
        })
    }

    fn initialize_result(
        &self,
        pipeline_id: u32,
        frame_number: u32,
        settings: &CaptureSettings,
    ) -> PipelineResult {
        let (pipeline_depth, report_sensor) = self
            .characteristics
            .as_ref()
            .map(|c| (c.max_pipeline_depth, c.supports(Capability::ReadSensorSettings)))
            .unwrap_or((0, false));

        let mut metadata = settings.clone();
        metadata.control_mode = Some(self.control_mode);
        metadata.ae_mode = Some(self.ae_mode);
        metadata.awb_mode = Some(self.awb_mode);
        metadata.af_mode = Some(self.af_mode);
        metadata.ae_state = Some(self.ae_state);
        metadata.ae_target_fps_range = Some(self.ae_target_fps);
        if report_sensor {
            metadata.exposure_time_ns = Some(self.exposure_time_ns);
            metadata.frame_duration_ns = Some(self.frame_duration_ns);
            metadata.sensitivity = Some(self.sensitivity);
        }

        PipelineResult {
            camera_id: self.camera_id,
            pipeline_id,
            frame_number,
            result_metadata: metadata,
            pipeline_depth,
            output_buffers: Vec::new(),
            input_buffers: Vec::new(),
            partial_result: PARTIAL_RESULT_COUNT,
        }
    }
}
