//! Support-circle member commands.

use clap::{Subcommand, ValueEnum};
use careloop_core::{
    Capability, CapabilitySet, Config, MemberRole, MemberStatus, NotificationChannel,
    NotificationPreferences, OccurrenceStore, SupportCircleMember,
};

use super::{open_engine, print_json, split_list, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Viewer,
    Supporter,
    Caregiver,
    Medical,
    Colleague,
}

impl From<RoleArg> for MemberRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Viewer => MemberRole::Viewer,
            RoleArg::Supporter => MemberRole::Supporter,
            RoleArg::Caregiver => MemberRole::Caregiver,
            RoleArg::Medical => MemberRole::Medical,
            RoleArg::Colleague => MemberRole::Colleague,
        }
    }
}

#[derive(Subcommand)]
pub enum MemberAction {
    /// Add or replace a member
    Add {
        /// Member ID
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        relationship: String,
        #[arg(long, value_enum, default_value = "supporter")]
        role: RoleArg,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Comma-separated content domains (mood,health,calendar,goals,gratitude)
        #[arg(long, default_value = "")]
        capabilities: String,
        /// Comma-separated channels the member wants (email,sms); default all
        #[arg(long)]
        channels: Option<String>,
        /// Allow this member to create and edit reminders
        #[arg(long)]
        can_send_reminders: bool,
        /// Never contact this member with alerts
        #[arg(long)]
        no_alerts: bool,
        #[arg(long)]
        inactive: bool,
    },
    /// List members
    List,
    /// Show one member
    Get {
        /// Member ID
        id: String,
    },
}

fn parse_capabilities(raw: &str) -> Result<CapabilitySet, Box<dyn std::error::Error>> {
    let mut set = CapabilitySet::new();
    for name in split_list(raw) {
        let capability = Capability::ALL
            .into_iter()
            .find(|c| c.to_string() == name)
            .ok_or_else(|| format!("unknown capability: {name}"))?;
        set = set.with(capability, true);
    }
    Ok(set)
}

fn parse_channels(raw: Option<&str>) -> Result<NotificationPreferences, Box<dyn std::error::Error>> {
    let Some(raw) = raw else {
        return Ok(NotificationPreferences::all());
    };
    let mut prefs = NotificationPreferences::none();
    for name in split_list(raw) {
        let channel =
            NotificationChannel::parse(&name).ok_or_else(|| format!("unknown channel: {name}"))?;
        prefs = prefs.with(channel, true);
    }
    Ok(prefs)
}

pub fn run(action: MemberAction) -> CliResult {
    let config = Config::load_or_default();
    let engine = open_engine(&config)?;

    match action {
        MemberAction::Add {
            id,
            name,
            relationship,
            role,
            email,
            phone,
            capabilities,
            channels,
            can_send_reminders,
            no_alerts,
            inactive,
        } => {
            let member = SupportCircleMember {
                id,
                display_name: name,
                relationship,
                role: role.into(),
                email,
                phone,
                capabilities: parse_capabilities(&capabilities)?,
                can_send_reminders,
                can_receive_alerts: !no_alerts,
                notification_preferences: parse_channels(channels.as_deref())?,
                status: if inactive {
                    MemberStatus::Inactive
                } else {
                    MemberStatus::Active
                },
            };
            let member = engine.add_member(member)?;
            print_json(&member)?;
        }
        MemberAction::List => {
            print_json(&engine.store().list_members()?)?;
        }
        MemberAction::Get { id } => match engine.store().get_member(&id)? {
            Some(member) => print_json(&member)?,
            None => return Err(format!("member not found: {id}").into()),
        },
    }
    Ok(())
}
