//! Administrative commands.
//!
//! Every command validates its arguments before touching any registry. A
//! rejected command yields exactly one [`CommandError`] whose `Display` is
//! the message shown to the operator, and changes nothing.

use crate::context::CloudContext;
use crate::error::{GroupError, ServiceError};
use fleet_protocol::{GameServerVersion, ServiceGroup};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Unknown or incomplete invocation; carries the usage grammar
    #[error("{0}")]
    Usage(String),
    #[error("Group '{0}' already exists")]
    DuplicateGroup(String),
    #[error("Group '{0}' does not exist")]
    UnknownGroup(String),
    #[error("Service '{0}' does not exist")]
    UnknownService(String),
    #[error("Version '{given}' is not available. Use one of: {valid}")]
    UnknownVersion { given: String, valid: String },
    #[error("Use following command: group edit {group} {field} <{expected}>")]
    InvalidValue {
        group: String,
        field: String,
        expected: &'static str,
    },
    /// The registry refused the change (invariant or storage failure)
    #[error("{0}")]
    Rejected(String),
    #[error("Unknown command '{0}'. Type 'help' for a list of commands")]
    UnknownCommand(String),
}

impl From<GroupError> for CommandError {
    fn from(e: GroupError) -> Self {
        match e {
            GroupError::DuplicateName(name) => Self::DuplicateGroup(name),
            GroupError::NotFound(name) => Self::UnknownGroup(name),
            GroupError::Validation(reason) => Self::Rejected(format!("Rejected: {reason}")),
            GroupError::Persistence(e) => Self::Rejected(format!("Could not store group: {e}")),
        }
    }
}

impl From<ServiceError> for CommandError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(name) => Self::UnknownService(name),
            other => Self::Rejected(other.to_string()),
        }
    }
}

const GROUP_USAGE: &[&str] = &[
    "group list - List all groups",
    "group create <name> <memory> <static> <version> - Register a group",
    "group remove <name> - Stop a group's services and delete it",
    "group info <name> - Show a group's settings",
    "group edit <name> <key> <value> - Change one setting",
    "  keys: memory, minservicecount, maxservicecount, defaultmaxplayers, fallback, maintenance, version",
];

const SERVICE_USAGE: &[&str] = &[
    "service list - List all services",
    "service info <name> - Show a service",
    "service stop <name> - Stop a service",
];

const PLAYER_USAGE: &[&str] = &["player list - List connected players"];

fn usage(lines: &[&str]) -> CommandError {
    CommandError::Usage(lines.join("\n"))
}

/// Lines printed by `help`.
pub fn help_lines() -> Vec<String> {
    GROUP_USAGE
        .iter()
        .chain(SERVICE_USAGE)
        .chain(PLAYER_USAGE)
        .map(|line| line.to_string())
        .chain([
            "help - Show this list".to_string(),
            "shutdown - Stop the master".to_string(),
        ])
        .collect()
}

/// Runs one command line and returns the lines to show the operator.
pub async fn execute(ctx: &CloudContext, line: &str) -> Result<Vec<String>, CommandError> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some((command, rest)) = args.split_first() else {
        return Ok(Vec::new());
    };

    match command.to_ascii_lowercase().as_str() {
        "group" | "groups" => group_command(ctx, rest).await,
        "service" | "services" => service_command(ctx, rest).await,
        "player" | "players" => player_command(ctx, rest),
        "help" => Ok(help_lines()),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn unknown_version(given: &str) -> CommandError {
    CommandError::UnknownVersion {
        given: given.to_string(),
        valid: GameServerVersion::ALL
            .iter()
            .map(|version| version.name())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// ============================================================================
// group
// ============================================================================

async fn group_command(ctx: &CloudContext, args: &[&str]) -> Result<Vec<String>, CommandError> {
    let sub = args.first().map(|s| s.to_ascii_lowercase());
    match (sub.as_deref(), args.len()) {
        (Some("list"), 1) => Ok(group_list(ctx)),
        (Some("create"), 5) => group_create(ctx, args[1], args[2], args[3], args[4]).await,
        (Some("remove"), 2) => {
            let removed = ctx.groups.remove(args[1]).await?;
            Ok(vec![format!("The group '{}' is now deleted.", removed.name)])
        }
        (Some("info"), 2) => {
            let group = ctx
                .groups
                .get(args[1])
                .ok_or_else(|| CommandError::UnknownGroup(args[1].to_string()))?;
            Ok(group_info(ctx, &group))
        }
        (Some("edit"), 4) => group_edit(ctx, args[1], args[2], args[3]).await,
        _ => Err(usage(GROUP_USAGE)),
    }
}

fn group_list(ctx: &CloudContext) -> Vec<String> {
    let groups = ctx.groups.get_all();
    if groups.is_empty() {
        return vec!["No groups registered.".to_string()];
    }
    groups
        .iter()
        .map(|group| {
            format!(
                "{} (version '{}' | node '{}' | {}/{} online)",
                group.name,
                group.version,
                group.node,
                ctx.services.online_count(&group.name),
                group.max_online
            )
        })
        .collect()
}

async fn group_create(
    ctx: &CloudContext,
    name: &str,
    memory: &str,
    static_service: &str,
    version: &str,
) -> Result<Vec<String>, CommandError> {
    const CREATE_USAGE: &str = "Use following command: group create <name> <memory:int> <static:true|false> <version>";

    if ctx.groups.contains(name) {
        return Err(CommandError::DuplicateGroup(name.to_string()));
    }
    let memory: i32 = memory
        .parse()
        .map_err(|_| CommandError::Usage(CREATE_USAGE.to_string()))?;
    let static_service =
        parse_bool(static_service).ok_or_else(|| CommandError::Usage(CREATE_USAGE.to_string()))?;
    let version = GameServerVersion::by_name(version).ok_or_else(|| unknown_version(version))?;

    let group = ServiceGroup::new(name, ctx.config.node_name.as_str(), memory, static_service, version);
    ctx.groups.create(group).await?;
    Ok(vec![format!("The group '{name}' is now registered and online.")])
}

fn group_info(ctx: &CloudContext, group: &ServiceGroup) -> Vec<String> {
    vec![
        format!("Group: {}", group.name),
        format!("Template: {}", group.template),
        format!("Node: {}", group.node),
        format!("Memory: {}mb", group.memory),
        format!("Min online services: {}", group.min_online),
        format!("Max online services: {}", group.max_online),
        format!("Online services: {}", ctx.services.online_count(&group.name)),
        format!("Default max players: {}", group.default_max_players),
        format!("Static: {}", group.static_service),
        format!("Version: {}", group.version.title()),
        format!("Fallback: {}", group.fallback),
        format!("Maintenance: {}", group.maintenance),
    ]
}

/// A parsed `group edit` assignment.
enum GroupEdit {
    Memory(i32),
    MinOnline(i32),
    MaxOnline(i32),
    DefaultMaxPlayers(i32),
    Fallback(bool),
    Maintenance(bool),
    Version(GameServerVersion),
}

impl GroupEdit {
    fn parse(group: &str, key: &str, value: &str) -> Result<Self, CommandError> {
        let int = |expected: &'static str| {
            value.parse::<i32>().map_err(|_| CommandError::InvalidValue {
                group: group.to_string(),
                field: key.to_string(),
                expected,
            })
        };
        let boolean = || {
            parse_bool(value).ok_or_else(|| CommandError::InvalidValue {
                group: group.to_string(),
                field: key.to_string(),
                expected: "true|false",
            })
        };

        match key {
            "memory" => int("int").map(Self::Memory),
            "minservicecount" => int("int").map(Self::MinOnline),
            "maxservicecount" => int("int").map(Self::MaxOnline),
            "defaultmaxplayers" => int("int").map(Self::DefaultMaxPlayers),
            "fallback" => boolean().map(Self::Fallback),
            "maintenance" => boolean().map(Self::Maintenance),
            "version" => GameServerVersion::by_name(value)
                .map(Self::Version)
                .ok_or_else(|| unknown_version(value)),
            _ => Err(usage(GROUP_USAGE)),
        }
    }

    fn apply(&self, group: &mut ServiceGroup) {
        match *self {
            Self::Memory(v) => group.memory = v,
            Self::MinOnline(v) => group.min_online = v,
            Self::MaxOnline(v) => group.max_online = v,
            Self::DefaultMaxPlayers(v) => group.default_max_players = v,
            Self::Fallback(v) => group.fallback = v,
            Self::Maintenance(v) => group.maintenance = v,
            Self::Version(v) => group.version = v,
        }
    }

    fn confirmation(&self) -> String {
        match self {
            Self::Memory(v) => format!("Successfully set memory to {v}mb"),
            Self::MinOnline(v) => format!("Successfully set min service count to {v}"),
            Self::MaxOnline(v) => format!("Successfully set max service count to {v}"),
            Self::DefaultMaxPlayers(v) => format!("Successfully set default max players to {v}"),
            Self::Fallback(v) => format!("Successfully set fallback to {v}"),
            Self::Maintenance(v) => format!("Successfully set maintenance to {v}"),
            Self::Version(v) => format!("Successfully set version to {}", v.name()),
        }
    }
}

async fn group_edit(
    ctx: &CloudContext,
    name: &str,
    key: &str,
    value: &str,
) -> Result<Vec<String>, CommandError> {
    if !ctx.groups.contains(name) {
        return Err(CommandError::UnknownGroup(name.to_string()));
    }
    let edit = GroupEdit::parse(name, &key.to_ascii_lowercase(), value)?;
    ctx.groups
        .edit(name, |group| {
            edit.apply(group);
            Ok(())
        })
        .await?;
    Ok(vec![edit.confirmation()])
}

// ============================================================================
// service
// ============================================================================

async fn service_command(ctx: &CloudContext, args: &[&str]) -> Result<Vec<String>, CommandError> {
    let sub = args.first().map(|s| s.to_ascii_lowercase());
    match (sub.as_deref(), args.len()) {
        (Some("list"), 1) => {
            let services = ctx.services.get_all();
            if services.is_empty() {
                return Ok(vec!["No services running.".to_string()]);
            }
            Ok(services
                .iter()
                .map(|service| {
                    format!(
                        "{} [{}] {} ({}/{} players)",
                        service.name,
                        service.state,
                        service.address(),
                        ctx.online_players(service),
                        service.max_players
                    )
                })
                .collect())
        }
        (Some("info"), 2) => {
            let service = ctx
                .services
                .get_by_name(args[1])
                .ok_or_else(|| CommandError::UnknownService(args[1].to_string()))?;
            Ok(vec![
                format!("Service: {}", service.name),
                format!("Group: {}", service.group),
                format!("Node: {}", service.node),
                format!("Address: {}", service.address()),
                format!("State: {}", service.state),
                format!("Visibility: {:?}", service.visibility),
                format!("Players: {}/{}", ctx.online_players(&service), service.max_players),
                format!("Motd: {}", service.motd),
            ])
        }
        (Some("stop"), 2) => {
            ctx.services.stop(args[1]).await?;
            Ok(vec![format!("The service '{}' is stopping.", args[1])])
        }
        _ => Err(usage(SERVICE_USAGE)),
    }
}

// ============================================================================
// player
// ============================================================================

fn player_command(ctx: &CloudContext, args: &[&str]) -> Result<Vec<String>, CommandError> {
    match args {
        [sub] if sub.eq_ignore_ascii_case("list") => {
            let players = ctx.players.snapshot();
            let mut lines = vec![format!("{} player(s) online", players.len())];
            lines.extend(players.iter().map(|player| {
                format!(
                    "{} ({}) proxy: {} | server: {}",
                    player.username,
                    player.uuid,
                    player.proxy_service.as_deref().unwrap_or("-"),
                    player.game_service.as_deref().unwrap_or("-")
                )
            }));
            Ok(lines)
        }
        _ => Err(usage(PLAYER_USAGE)),
    }
}
