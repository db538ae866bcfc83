//! Helpers shared by the unit tests and the integration tests under `tests/`.
//!
//! Included into the integration tests with `#[path]`, so everything here must be reachable
//! through external crate paths only.
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::StreamExt;
use srvmgmt_core::models::{Difficulty, GameRule, GameRuleValue, IpBan, Player, ServerState, SystemMessage, UserBan, Version};
use srvmgmt_core::{
    AllowListService, GameRuleService, HostApi, IpBanService, MainThreadHandle, ManagementApi, PlayerService,
    ServerSettingsService, ServerStateService, ServiceError, UserBanService,
};
use srvmgmt_jsonrpc::Transport;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a tracing subscriber that writes through the test harness, once per process.
///
/// Honors `RUST_LOG`, defaulting to everything.
pub fn init_test_logging() {
    static INIT: OnceLock<()> = OnceLock::new();

    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
        let _ = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Two connected in-memory transports.  Whatever is sent into one comes out of the other.
pub fn setup_test_channel() -> (impl Transport, impl Transport) {
    let (a_tx, a_rx) = futures::channel::mpsc::unbounded::<String>();
    let (b_tx, b_rx) = futures::channel::mpsc::unbounded::<String>();

    ((b_rx.map(Ok::<String, Infallible>), a_tx), (a_rx.map(Ok::<String, Infallible>), b_tx))
}

/// In-memory stand-in for a game server.
///
/// Its main thread is a dedicated std thread draining the hand-off queue, which exits once the
/// last handle is dropped.
pub struct FakeServer {
    main_thread: MainThreadHandle,
    state: Arc<Mutex<FakeState>>,
    players: FakePlayers,
    allow_list: FakeAllowList,
    user_bans: FakeUserBans,
    ip_bans: FakeIpBans,
    game_rules: FakeGameRules,
    server_state: FakeServerState,
    settings: FakeSettings,
}

#[derive(Debug)]
pub struct FakeState {
    pub online: Vec<Player>,
    pub kicked: Vec<(Player, Option<String>)>,
    pub allow_list: Vec<Player>,
    pub user_bans: Vec<UserBan>,
    pub ip_bans: Vec<IpBan>,
    pub game_rules: Vec<GameRule>,
    pub difficulty: Difficulty,
    pub motd: String,
    pub max_players: u32,
    pub enforce_allowlist: bool,
    pub saves: Vec<bool>,
    pub halted: bool,
    pub system_messages: Vec<SystemMessage>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            online: vec![Player::named("Alex"), Player::named("Steve")],
            kicked: Vec::new(),
            allow_list: Vec::new(),
            user_bans: Vec::new(),
            ip_bans: Vec::new(),
            game_rules: vec![
                GameRule::new("doDaylightCycle", GameRuleValue::Boolean(true)),
                GameRule::new("randomTickSpeed", GameRuleValue::Integer(3)),
            ],
            difficulty: Difficulty::Normal,
            motd: "A fake server".to_string(),
            max_players: 20,
            enforce_allowlist: false,
            saves: Vec::new(),
            halted: false,
            system_messages: Vec::new(),
        }
    }
}

pub fn fake_server() -> Arc<FakeServer> {
    let (handle, queue) = srvmgmt_core::main_thread();

    std::thread::Builder::new()
        .name("fake-main".to_string())
        .spawn(move || queue.run())
        .expect("spawn fake main thread");

    let state = Arc::new(Mutex::new(FakeState::default()));
    Arc::new(FakeServer {
        main_thread: handle,
        players: FakePlayers(state.clone()),
        allow_list: FakeAllowList(state.clone()),
        user_bans: FakeUserBans(state.clone()),
        ip_bans: FakeIpBans(state.clone()),
        game_rules: FakeGameRules(state.clone()),
        server_state: FakeServerState(state.clone()),
        settings: FakeSettings(state.clone()),
        state,
    })
}

impl FakeServer {
    /// Direct access to the fake's state, for setting up and inspecting tests.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }
}

impl HostApi for FakeServer {
    fn main_thread(&self) -> &MainThreadHandle {
        &self.main_thread
    }
}

impl ManagementApi for FakeServer {
    fn players(&self) -> &dyn PlayerService {
        &self.players
    }

    fn user_bans(&self) -> &dyn UserBanService {
        &self.user_bans
    }

    fn ip_bans(&self) -> &dyn IpBanService {
        &self.ip_bans
    }

    fn allow_list(&self) -> &dyn AllowListService {
        &self.allow_list
    }

    fn game_rules(&self) -> &dyn GameRuleService {
        &self.game_rules
    }

    fn server_state(&self) -> &dyn ServerStateService {
        &self.server_state
    }

    fn server_settings(&self) -> &dyn ServerSettingsService {
        &self.settings
    }
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FakePlayers(Arc<Mutex<FakeState>>);

impl PlayerService for FakePlayers {
    fn online_players(&self) -> Vec<Player> {
        lock(&self.0).online.clone()
    }

    fn kick(&self, player: &Player, message: Option<&str>) -> Option<Player> {
        let mut state = lock(&self.0);
        let index = state.online.iter().position(|online| online.refers_to(player))?;
        let kicked = state.online.remove(index);
        state.kicked.push((kicked.clone(), message.map(str::to_string)));
        Some(kicked)
    }
}

struct FakeAllowList(Arc<Mutex<FakeState>>);

impl AllowListService for FakeAllowList {
    fn entries(&self) -> Vec<Player> {
        lock(&self.0).allow_list.clone()
    }

    fn add(&self, player: Player) -> bool {
        let mut state = lock(&self.0);
        if state.allow_list.iter().any(|entry| entry.refers_to(&player)) {
            return false;
        }
        state.allow_list.push(player);
        true
    }

    fn remove(&self, player: &Player) -> bool {
        let mut state = lock(&self.0);
        let before = state.allow_list.len();
        state.allow_list.retain(|entry| !entry.refers_to(player));
        state.allow_list.len() != before
    }

    fn clear(&self) {
        lock(&self.0).allow_list.clear();
    }
}

struct FakeUserBans(Arc<Mutex<FakeState>>);

impl UserBanService for FakeUserBans {
    fn bans(&self) -> Vec<UserBan> {
        lock(&self.0).user_bans.clone()
    }

    fn add(&self, ban: UserBan) -> bool {
        let mut state = lock(&self.0);
        state.user_bans.retain(|existing| !existing.player.refers_to(&ban.player));
        state.user_bans.push(ban);
        true
    }

    fn remove(&self, player: &Player) -> bool {
        let mut state = lock(&self.0);
        let before = state.user_bans.len();
        state.user_bans.retain(|ban| !ban.player.refers_to(player));
        state.user_bans.len() != before
    }

    fn clear(&self) {
        lock(&self.0).user_bans.clear();
    }
}

struct FakeIpBans(Arc<Mutex<FakeState>>);

impl IpBanService for FakeIpBans {
    fn bans(&self) -> Vec<IpBan> {
        lock(&self.0).ip_bans.clone()
    }

    fn add(&self, ban: IpBan) -> bool {
        let mut state = lock(&self.0);
        state.ip_bans.retain(|existing| existing.ip != ban.ip);
        state.ip_bans.push(ban);
        true
    }

    fn remove(&self, ip: &str) -> bool {
        let mut state = lock(&self.0);
        let before = state.ip_bans.len();
        state.ip_bans.retain(|ban| ban.ip != ip);
        state.ip_bans.len() != before
    }

    fn clear(&self) {
        lock(&self.0).ip_bans.clear();
    }
}

struct FakeGameRules(Arc<Mutex<FakeState>>);

impl GameRuleService for FakeGameRules {
    fn rules(&self) -> Vec<GameRule> {
        lock(&self.0).game_rules.clone()
    }

    fn update(&self, rule: GameRule) -> Result<GameRule, ServiceError> {
        let mut state = lock(&self.0);
        let existing = state
            .game_rules
            .iter_mut()
            .find(|existing| existing.key == rule.key)
            .ok_or_else(|| ServiceError::UnknownGameRule { key: rule.key.clone() })?;

        if existing.value.type_name() != rule.value.type_name() {
            return Err(ServiceError::GameRuleType {
                key: rule.key,
                expected: existing.value.type_name(),
            });
        }

        existing.value = rule.value;
        Ok(existing.clone())
    }
}

struct FakeServerState(Arc<Mutex<FakeState>>);

impl ServerStateService for FakeServerState {
    fn status(&self) -> ServerState {
        let state = lock(&self.0);
        ServerState {
            started: !state.halted,
            players: state.online.clone(),
            version: Version {
                name: "1.21.9".to_string(),
                protocol: 773,
            },
        }
    }

    fn save_all(&self, flush: bool) -> bool {
        lock(&self.0).saves.push(flush);
        true
    }

    fn halt(&self) -> bool {
        let mut state = lock(&self.0);
        let was_running = !state.halted;
        state.halted = true;
        was_running
    }

    fn send_system_message(&self, message: &SystemMessage) -> bool {
        lock(&self.0).system_messages.push(message.clone());
        true
    }
}

struct FakeSettings(Arc<Mutex<FakeState>>);

impl ServerSettingsService for FakeSettings {
    fn difficulty(&self) -> Difficulty {
        lock(&self.0).difficulty
    }

    fn set_difficulty(&self, difficulty: Difficulty) -> Difficulty {
        lock(&self.0).difficulty = difficulty;
        difficulty
    }

    fn motd(&self) -> String {
        lock(&self.0).motd.clone()
    }

    fn set_motd(&self, motd: String) -> String {
        lock(&self.0).motd = motd.clone();
        motd
    }

    fn max_players(&self) -> u32 {
        lock(&self.0).max_players
    }

    fn set_max_players(&self, max: u32) -> Result<u32, ServiceError> {
        if max == 0 {
            return Err(ServiceError::InvalidSetting {
                setting: "max_players",
                reason: "must be at least 1".to_string(),
            });
        }
        lock(&self.0).max_players = max;
        Ok(max)
    }

    fn enforce_allowlist(&self) -> bool {
        lock(&self.0).enforce_allowlist
    }

    fn set_enforce_allowlist(&self, enforce: bool) -> bool {
        lock(&self.0).enforce_allowlist = enforce;
        enforce
    }
}
