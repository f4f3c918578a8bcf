use levelflow_kernel::World;
use levelflow_stream::{LevelStreamingScheduler, StreamConfig};

use crate::url::TravelUrl;

/// The live world together with the streaming state that belongs to it.
///
/// A seamless travel replaces both at once; nothing else holds the world.
pub struct WorldContext {
    pub world: World,
    pub streaming: LevelStreamingScheduler,
    /// URL of the last completed travel, used by `?restart`.
    pub last_url: Option<TravelUrl>,
}

impl WorldContext {
    pub fn new(world: World, config: StreamConfig) -> Self {
        let streaming = LevelStreamingScheduler::from_world(&world, config);
        Self {
            world,
            streaming,
            last_url: None,
        }
    }
}
