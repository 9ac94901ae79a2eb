// kv-core: the typed in-memory stores and codecs behind the server.
//
// Each store owns its own lock and exposes only whole operations; nothing
// here touches the network.  Blocking reads (BLPOP, XREAD BLOCK) live on
// the stores too, as signalled waits with a re-check tick.

pub mod geo;
pub mod snapshot;
pub mod stores;

pub type StringStore = stores::StringStore;
pub type ListStore = stores::ListStore;
pub type StreamStore = stores::StreamStore;
pub type SortedSetStore = stores::SortedSetStore;
pub type StreamId = stores::StreamId;
pub type StreamEntry = stores::StreamEntry;
