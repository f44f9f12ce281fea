// SPDX-License-Identifier: GPL-3.0-only

//! Emulated camera request pipeline
//!
//! ```text
//! caller ──► RequestProcessor (bounded queue) ──► worker thread
//!                 │                                   │
//!           acquisition (lock, geometry,        fence wait ──► SensorEngine
//!           fence import)                                        │
//!                                                notifications ◄─┘
//! ```
//!
//! # Modules
//!
//! - [`geometry`]: stride and size of single-plane buffers
//! - [`acquisition`]: locking client buffers into sensor buffers
//! - [`fence`]: acquire fences and the fence wait stage
//! - [`processor`]: admission queue and request worker
//! - [`sensor`]: sensor engine interface and simulated sensor
//! - [`session`]: pipeline configuration

pub mod acquisition;
pub mod fence;
pub mod geometry;
pub mod importer;
pub mod notify;
pub mod processor;
pub mod request_state;
pub mod sensor;
pub mod session;
pub mod types;
pub mod worker;

pub use fence::{Fence, FenceHandle};
pub use importer::{BufferHandle, BufferImporter, HeapBufferImporter};
pub use notify::{ChannelCallback, PipelineCallback, PipelineEvent};
pub use processor::RequestProcessor;
pub use request_state::{CaptureSettings, EmulatedRequestState, RequestState, StaticCharacteristics};
pub use sensor::{SensorEngine, SimulatedSensor};
pub use session::CameraSession;
pub use types::*;
