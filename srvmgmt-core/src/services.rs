//! The boundary between the protocol engine and the host's business logic.
//!
//! Service methods are synchronous and may touch simulation state, so the built-in methods that
//! call them run on the host's main thread (see [`crate::MainThreadHandle`]).  Implementations
//! do not need to be re-entrant with respect to the network layer.
use crate::ServiceError;
use crate::MainThreadHandle;
use crate::models::{Difficulty, GameRule, IpBan, Player, ServerState, SystemMessage, UserBan};

pub trait PlayerService: Send + Sync {
    fn online_players(&self) -> Vec<Player>;

    /// Disconnect `player` if they are online.  Returns the resolved player that was kicked.
    fn kick(&self, player: &Player, message: Option<&str>) -> Option<Player>;
}

pub trait AllowListService: Send + Sync {
    fn entries(&self) -> Vec<Player>;

    /// Returns false if the player was already on the list.
    fn add(&self, player: Player) -> bool;

    /// Returns false if the player was not on the list.
    fn remove(&self, player: &Player) -> bool;

    fn clear(&self);
}

pub trait UserBanService: Send + Sync {
    fn bans(&self) -> Vec<UserBan>;

    /// Adds or replaces the ban for `ban.player`.
    fn add(&self, ban: UserBan) -> bool;

    fn remove(&self, player: &Player) -> bool;

    fn clear(&self);
}

pub trait IpBanService: Send + Sync {
    fn bans(&self) -> Vec<IpBan>;

    fn add(&self, ban: IpBan) -> bool;

    fn remove(&self, ip: &str) -> bool;

    fn clear(&self);
}

pub trait GameRuleService: Send + Sync {
    fn rules(&self) -> Vec<GameRule>;

    /// Change a rule's value, returning the rule as stored.
    ///
    /// Fails if the rule doesn't exist or the value has the wrong type.
    fn update(&self, rule: GameRule) -> Result<GameRule, ServiceError>;
}

pub trait ServerStateService: Send + Sync {
    fn status(&self) -> ServerState;

    /// Save all worlds, optionally forcing the data to disk before returning.
    fn save_all(&self, flush: bool) -> bool;

    /// Ask the server to shut down.  The shutdown itself happens asynchronously.
    fn halt(&self) -> bool;

    fn send_system_message(&self, message: &SystemMessage) -> bool;
}

pub trait ServerSettingsService: Send + Sync {
    fn difficulty(&self) -> Difficulty;
    fn set_difficulty(&self, difficulty: Difficulty) -> Difficulty;

    fn motd(&self) -> String;
    fn set_motd(&self, motd: String) -> String;

    fn max_players(&self) -> u32;
    fn set_max_players(&self, max: u32) -> Result<u32, ServiceError>;

    fn enforce_allowlist(&self) -> bool;
    fn set_enforce_allowlist(&self, enforce: bool) -> bool;
}

/// What the protocol engine needs from any host, regardless of which methods it registers.
pub trait HostApi: Send + Sync + 'static {
    /// Submitter for work that must run on the host's main thread.
    fn main_thread(&self) -> &MainThreadHandle;
}

/// The full set of services the built-in management methods operate on.
pub trait ManagementApi: HostApi {
    fn players(&self) -> &dyn PlayerService;
    fn user_bans(&self) -> &dyn UserBanService;
    fn ip_bans(&self) -> &dyn IpBanService;
    fn allow_list(&self) -> &dyn AllowListService;
    fn game_rules(&self) -> &dyn GameRuleService;
    fn server_state(&self) -> &dyn ServerStateService;
    fn server_settings(&self) -> &dyn ServerSettingsService;
}
