//! The built-in management methods, operating on a host's [`ManagementApi`].
//!
//! Every incoming method here touches game state, so they all run on the host's main thread.
//! The notifications are registered here so they appear in the discovery document, but sending
//! them is up to the host: it knows when a player joined or a save finished.
use srvmgmt_core::ManagementApi;
use srvmgmt_core::models::{
    Difficulty, GameRule, IpBan, KickPlayer, Player, ServerState, SystemMessage, UserBan,
};

use crate::registry::{OutgoingNotification, RegistryBuilder};
use crate::{MethodId, RegistryError};

/// Handles for the notifications registered by [`register_builtin_methods`], to pass to
/// [`crate::Connection::send_notification`] or [`crate::Server::broadcast_notification`].
#[derive(Debug, Clone)]
pub struct BuiltinNotifications {
    pub server_started: OutgoingNotification,
    pub server_stopping: OutgoingNotification,
    pub server_saving: OutgoingNotification,
    pub server_saved: OutgoingNotification,
    pub status: OutgoingNotification<ServerState>,
    pub player_joined: OutgoingNotification<Player>,
    pub player_left: OutgoingNotification<Player>,
    pub allowlist_added: OutgoingNotification<Player>,
    pub allowlist_removed: OutgoingNotification<Player>,
    pub ban_added: OutgoingNotification<UserBan>,
    pub ban_removed: OutgoingNotification<Player>,
    pub ip_ban_added: OutgoingNotification<IpBan>,
    pub ip_ban_removed: OutgoingNotification<String>,
    pub gamerule_updated: OutgoingNotification<GameRule>,
}

/// Register every built-in method and notification in the `game` namespace.
pub fn register_builtin_methods<A: ManagementApi>(
    builder: &mut RegistryBuilder<A>,
) -> Result<BuiltinNotifications, RegistryError> {
    register_players(builder)?;
    register_allowlist(builder)?;
    register_bans(builder)?;
    register_ip_bans(builder)?;
    register_gamerules(builder)?;
    register_server(builder)?;
    register_settings(builder)?;

    register_notifications(builder)
}

fn register_players<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("players")?, "Get all connected players")
        .on_main_thread()
        .handler("players", |api: &A, _client| Ok(api.players().online_players()))?;

    builder
        .method(MethodId::game("players/kick")?, "Kick players")
        .on_main_thread()
        .handler_with_params("kick", "kicked", |api: &A, kicks: Vec<KickPlayer>, _client| {
            let kicked: Vec<Player> = kicks
                .iter()
                .filter_map(|kick| api.players().kick(&kick.player, kick.message.as_deref()))
                .collect();
            tracing::debug!(requested = kicks.len(), kicked = kicked.len(), "Kicked players");
            Ok(kicked)
        })?;

    Ok(())
}

fn register_allowlist<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("allowlist")?, "Get the allowlist")
        .on_main_thread()
        .handler("allowlist", |api: &A, _client| Ok(api.allow_list().entries()))?;

    builder
        .method(MethodId::game("allowlist/set")?, "Replace the allowlist")
        .on_main_thread()
        .handler_with_params("players", "allowlist", |api: &A, players: Vec<Player>, _client| {
            let allow_list = api.allow_list();
            allow_list.clear();
            for player in players {
                allow_list.add(player);
            }
            Ok(allow_list.entries())
        })?;

    builder
        .method(MethodId::game("allowlist/add")?, "Add players to the allowlist")
        .on_main_thread()
        .handler_with_params("add", "allowlist", |api: &A, players: Vec<Player>, _client| {
            for player in players {
                api.allow_list().add(player);
            }
            Ok(api.allow_list().entries())
        })?;

    builder
        .method(MethodId::game("allowlist/remove")?, "Remove players from the allowlist")
        .on_main_thread()
        .handler_with_params("remove", "allowlist", |api: &A, players: Vec<Player>, _client| {
            for player in &players {
                api.allow_list().remove(player);
            }
            Ok(api.allow_list().entries())
        })?;

    builder
        .method(MethodId::game("allowlist/clear")?, "Clear the allowlist")
        .on_main_thread()
        .handler("allowlist", |api: &A, _client| {
            api.allow_list().clear();
            Ok(api.allow_list().entries())
        })?;

    Ok(())
}

fn register_bans<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("bans")?, "Get the ban list")
        .on_main_thread()
        .handler("banlist", |api: &A, _client| Ok(api.user_bans().bans()))?;

    builder
        .method(MethodId::game("bans/set")?, "Replace the ban list")
        .on_main_thread()
        .handler_with_params("bans", "banlist", |api: &A, bans: Vec<UserBan>, _client| {
            let user_bans = api.user_bans();
            user_bans.clear();
            for ban in bans {
                user_bans.add(ban);
            }
            Ok(user_bans.bans())
        })?;

    builder
        .method(MethodId::game("bans/add")?, "Ban players")
        .on_main_thread()
        .handler_with_params("add", "banlist", |api: &A, bans: Vec<UserBan>, _client| {
            for ban in bans {
                api.user_bans().add(ban);
            }
            Ok(api.user_bans().bans())
        })?;

    builder
        .method(MethodId::game("bans/remove")?, "Unban players")
        .on_main_thread()
        .handler_with_params("remove", "banlist", |api: &A, players: Vec<Player>, _client| {
            for player in &players {
                api.user_bans().remove(player);
            }
            Ok(api.user_bans().bans())
        })?;

    builder
        .method(MethodId::game("bans/clear")?, "Clear the ban list")
        .on_main_thread()
        .handler("banlist", |api: &A, _client| {
            api.user_bans().clear();
            Ok(api.user_bans().bans())
        })?;

    Ok(())
}

fn register_ip_bans<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("ip_bans")?, "Get the IP ban list")
        .on_main_thread()
        .handler("banlist", |api: &A, _client| Ok(api.ip_bans().bans()))?;

    builder
        .method(MethodId::game("ip_bans/set")?, "Replace the IP ban list")
        .on_main_thread()
        .handler_with_params("bans", "banlist", |api: &A, bans: Vec<IpBan>, _client| {
            let ip_bans = api.ip_bans();
            ip_bans.clear();
            for ban in bans {
                ip_bans.add(ban);
            }
            Ok(ip_bans.bans())
        })?;

    builder
        .method(MethodId::game("ip_bans/add")?, "Ban IP addresses")
        .on_main_thread()
        .handler_with_params("add", "banlist", |api: &A, bans: Vec<IpBan>, _client| {
            for ban in bans {
                api.ip_bans().add(ban);
            }
            Ok(api.ip_bans().bans())
        })?;

    builder
        .method(MethodId::game("ip_bans/remove")?, "Unban IP addresses")
        .on_main_thread()
        .handler_with_params("ip", "banlist", |api: &A, ips: Vec<String>, _client| {
            for ip in &ips {
                api.ip_bans().remove(ip);
            }
            Ok(api.ip_bans().bans())
        })?;

    builder
        .method(MethodId::game("ip_bans/clear")?, "Clear the IP ban list")
        .on_main_thread()
        .handler("banlist", |api: &A, _client| {
            api.ip_bans().clear();
            Ok(api.ip_bans().bans())
        })?;

    Ok(())
}

fn register_gamerules<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("gamerules")?, "Get the game rules")
        .on_main_thread()
        .handler("gamerules", |api: &A, _client| Ok(api.game_rules().rules()))?;

    builder
        .method(MethodId::game("gamerules/update")?, "Update a game rule")
        .on_main_thread()
        .handler_with_params("gamerule", "gamerule", |api: &A, rule: GameRule, _client| {
            Ok(api.game_rules().update(rule)?)
        })?;

    Ok(())
}

fn register_server<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("server/status")?, "Get the server status")
        .on_main_thread()
        .handler("status", |api: &A, _client| Ok(api.server_state().status()))?;

    builder
        .method(MethodId::game("server/save")?, "Save all worlds")
        .on_main_thread()
        .handler_with_params("flush", "saving", |api: &A, flush: bool, _client| {
            Ok(api.server_state().save_all(flush))
        })?;

    builder
        .method(MethodId::game("server/stop")?, "Stop the server")
        .on_main_thread()
        .handler("stopping", |api: &A, client| {
            tracing::info!(%client, "Server stop requested by management client");
            Ok(api.server_state().halt())
        })?;

    builder
        .method(MethodId::game("server/system_message")?, "Send a system message to players")
        .on_main_thread()
        .handler_with_params("message", "sent", |api: &A, message: SystemMessage, _client| {
            Ok(api.server_state().send_system_message(&message))
        })?;

    Ok(())
}

fn register_settings<A: ManagementApi>(builder: &mut RegistryBuilder<A>) -> Result<(), RegistryError> {
    builder
        .method(MethodId::game("serversettings/difficulty")?, "Get the difficulty")
        .on_main_thread()
        .handler("difficulty", |api: &A, _client| Ok(api.server_settings().difficulty()))?;
    builder
        .method(MethodId::game("serversettings/difficulty/set")?, "Set the difficulty")
        .on_main_thread()
        .handler_with_params("difficulty", "difficulty", |api: &A, difficulty: Difficulty, _client| {
            Ok(api.server_settings().set_difficulty(difficulty))
        })?;

    builder
        .method(MethodId::game("serversettings/motd")?, "Get the message of the day")
        .on_main_thread()
        .handler("message", |api: &A, _client| Ok(api.server_settings().motd()))?;
    builder
        .method(MethodId::game("serversettings/motd/set")?, "Set the message of the day")
        .on_main_thread()
        .handler_with_params("message", "message", |api: &A, motd: String, _client| {
            Ok(api.server_settings().set_motd(motd))
        })?;

    builder
        .method(MethodId::game("serversettings/max_players")?, "Get the player limit")
        .on_main_thread()
        .handler("max", |api: &A, _client| Ok(api.server_settings().max_players()))?;
    builder
        .method(MethodId::game("serversettings/max_players/set")?, "Set the player limit")
        .on_main_thread()
        .handler_with_params("max", "max", |api: &A, max: u32, _client| {
            Ok(api.server_settings().set_max_players(max)?)
        })?;

    builder
        .method(MethodId::game("serversettings/enforce_allowlist")?, "Get whether the allowlist is enforced")
        .on_main_thread()
        .handler("enforced", |api: &A, _client| Ok(api.server_settings().enforce_allowlist()))?;
    builder
        .method(MethodId::game("serversettings/enforce_allowlist/set")?, "Set whether the allowlist is enforced")
        .on_main_thread()
        .handler_with_params("enforce", "enforced", |api: &A, enforce: bool, _client| {
            Ok(api.server_settings().set_enforce_allowlist(enforce))
        })?;

    Ok(())
}

fn register_notifications<A: ManagementApi>(
    builder: &mut RegistryBuilder<A>,
) -> Result<BuiltinNotifications, RegistryError> {
    let id = |path: &str| MethodId::notification(crate::method_id::DEFAULT_NAMESPACE, path);

    Ok(BuiltinNotifications {
        server_started: builder.notification(id("server/started")?, "Server started")?,
        server_stopping: builder.notification(id("server/stopping")?, "Server shutting down")?,
        server_saving: builder.notification(id("server/saving")?, "Server save started")?,
        server_saved: builder.notification(id("server/saved")?, "Server save completed")?,
        status: builder.notification_with_params(id("server/status")?, "Server status heartbeat", "status")?,
        player_joined: builder.notification_with_params(id("players/joined")?, "Player joined", "player")?,
        player_left: builder.notification_with_params(id("players/left")?, "Player left", "player")?,
        allowlist_added: builder.notification_with_params(
            id("allowlist/added")?,
            "Player was added to the allowlist",
            "player",
        )?,
        allowlist_removed: builder.notification_with_params(
            id("allowlist/removed")?,
            "Player was removed from the allowlist",
            "player",
        )?,
        ban_added: builder.notification_with_params(id("bans/added")?, "Player was banned", "ban")?,
        ban_removed: builder.notification_with_params(id("bans/removed")?, "Player was unbanned", "player")?,
        ip_ban_added: builder.notification_with_params(id("ip_bans/added")?, "IP address was banned", "ban")?,
        ip_ban_removed: builder.notification_with_params(id("ip_bans/removed")?, "IP address was unbanned", "ip")?,
        gamerule_updated: builder.notification_with_params(id("gamerules/updated")?, "Game rule changed", "gamerule")?,
    })
}
