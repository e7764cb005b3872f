pub mod frames;

pub use frames::{ConnectedMarker, EventFrame, UpdatePayload, CONTENT_UPDATE};
