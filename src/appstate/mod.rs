//! App-state synchronization: the LTHash CRDT, mutation/patch codecs and
//! the pull/push engine keeping five named collections in step with the
//! server's authoritative view.

mod engine;
mod keys;
pub mod lthash;
pub mod patch;
mod state;

pub use engine::{
    mute_actions, patch_bytes_of_push, AppStateEngine, PatchList, PullOutcome, MAX_PULL_ATTEMPTS,
};
pub use keys::{expand_app_state_keys, AppStateSyncKey, ExpandedAppStateKeys, KEY_ID_LENGTH};
pub use state::{
    content_mac, patch_mac, AppStateError, HashState, Mutation, Operation, ALL_COLLECTIONS,
};
