pub mod client;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod protocol;

pub use client::ZmqComputeClient;
pub use endpoint::Endpoint;
pub use envelope::Envelope;
pub use error::WireError;
pub use listener::{ReplyToken, RequestListener};
pub use protocol::{
    topics, BigBangRequest, CellChunk, ComputeBatch, ComputeService, RegisterAck, RegisterWorker,
    ReturnedBatch,
};
