// SPDX-License-Identifier: GPL-3.0-only

//! Camera session: pipeline configuration on top of the request processor

use super::importer::BufferImporter;
use super::notify::PipelineCallback;
use super::processor::RequestProcessor;
use super::request_state::{CaptureSettings, RequestState, StaticCharacteristics};
use super::sensor::SensorEngine;
use super::types::{CaptureRequest, Pipeline, RequestTemplate, StreamDescriptor};
use crate::config::ProcessorConfig;
use crate::constants::USAGE_SW_WRITE_OFTEN;
use crate::errors::{ProcessorError, ProcessorResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// An open emulated camera
///
/// Pipelines are configured first, then built; requests may only be submitted
/// while pipelines are built. Pipeline ids are assigned in configuration order.
pub struct CameraSession {
    processor: RequestProcessor,
    characteristics: StaticCharacteristics,
    pipelines: Vec<Pipeline>,
    pipelines_built: bool,
}

impl CameraSession {
    pub fn new(
        config: ProcessorConfig,
        characteristics: StaticCharacteristics,
        sensor: Arc<dyn SensorEngine>,
        importer: Arc<dyn BufferImporter>,
        request_state: Box<dyn RequestState>,
    ) -> ProcessorResult<Self> {
        let processor = RequestProcessor::new(config, sensor, importer, request_state)?;
        processor.initialize(characteristics.clone())?;

        Ok(Self {
            processor,
            characteristics,
            pipelines: Vec::new(),
            pipelines_built: false,
        })
    }

    /// Register a pipeline and return its id
    pub fn configure_pipeline(
        &mut self,
        physical_camera_id: u32,
        callback: Arc<dyn PipelineCallback>,
        streams: Vec<StreamDescriptor>,
    ) -> ProcessorResult<u32> {
        if self.pipelines_built {
            return Err(ProcessorError::InvalidState(
                "pipelines already built".into(),
            ));
        }

        let mut stream_map = HashMap::with_capacity(streams.len());
        for mut stream in streams {
            stream.producer_usage = USAGE_SW_WRITE_OFTEN;
            let id = stream.id;
            if stream_map.insert(id, stream).is_some() {
                return Err(ProcessorError::InvalidArgument(format!(
                    "duplicate stream id {}",
                    id
                )));
            }
        }

        let id = self.pipelines.len() as u32;
        debug!(pipeline_id = id, streams = stream_map.len(), "Pipeline configured");
        self.pipelines.push(Pipeline {
            id,
            physical_camera_id,
            callback,
            streams: stream_map,
        });
        Ok(id)
    }

    pub fn build_pipelines(&mut self) -> ProcessorResult<()> {
        if self.pipelines_built {
            return Err(ProcessorError::InvalidState(
                "pipelines already built".into(),
            ));
        }
        if self.pipelines.is_empty() {
            return Err(ProcessorError::InvalidState(
                "no pipelines configured".into(),
            ));
        }

        self.pipelines_built = true;
        info!(pipelines = self.pipelines.len(), "Pipelines built");
        Ok(())
    }

    /// Flush outstanding work and forget all pipelines
    pub fn destroy_pipelines(&mut self) -> ProcessorResult<()> {
        if !self.pipelines_built {
            return Ok(());
        }

        let status = self.processor.flush();
        self.pipelines.clear();
        self.pipelines_built = false;
        info!("Pipelines destroyed");
        status
    }

    pub fn configured_streams(
        &self,
        pipeline_id: u32,
    ) -> ProcessorResult<&HashMap<u32, StreamDescriptor>> {
        self.pipelines
            .get(pipeline_id as usize)
            .map(|p| &p.streams)
            .ok_or_else(|| {
                ProcessorError::InvalidArgument(format!("unknown pipeline id {}", pipeline_id))
            })
    }

    pub fn submit_requests(
        &self,
        frame_number: u32,
        requests: &[CaptureRequest],
    ) -> ProcessorResult<()> {
        if !self.pipelines_built {
            return Err(ProcessorError::InvalidState(
                "pipelines not built".into(),
            ));
        }
        self.processor
            .process_requests(frame_number, requests, &self.pipelines)
    }

    pub fn flush(&self) -> ProcessorResult<()> {
        self.processor.flush()
    }

    pub fn construct_default_request_settings(
        &self,
        template: RequestTemplate,
    ) -> ProcessorResult<CaptureSettings> {
        self.processor.get_default_request(template)
    }

    pub fn characteristics(&self) -> &StaticCharacteristics {
        &self.characteristics
    }

    pub fn pending_requests(&self) -> usize {
        self.processor.queue_len()
    }

    /// Stop the request worker and the sensor
    pub fn close(mut self) -> ProcessorResult<()> {
        self.destroy_pipelines()?;
        self.processor.stop()
    }
}
