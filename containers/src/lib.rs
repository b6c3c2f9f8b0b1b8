pub mod messages;
pub mod status;
pub mod tx;
pub mod types;

pub use messages::{
    BodiesRequest, BodiesResponse, HashOrNumber, HeadAnnouncement, HeaderQuery, HeaderResponse,
    RawData, SyncRequest, SyncResponse, TxsRequest, TxsResponse,
};
pub use status::NodeStatus;
pub use tx::{Sequencer, SequencerHeader, Tx, Txi};
pub use types::{Address, Hash};
