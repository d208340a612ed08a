use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::DEFAULT_MESH_SSID;

#[derive(Parser, Debug)]
#[command(
    name = "meshlink",
    author,
    version,
    about = "Join or create a mesh network and put the previous connection back"
)]
pub struct Cli {
    /// Override the state root (defaults to $MESHLINK_ROOT, /var/lib/meshlink or the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format for command responses
    #[arg(
        long = "output",
        value_enum,
        default_value_t = OutputFormat::Json,
        global = true
    )]
    pub output_format: OutputFormat,

    /// Log at debug level regardless of the logging config
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wireless interfaces with their addressing and current connection
    Interfaces,
    /// Visible networks, strongest first
    Networks,
    /// Join the profile's mesh, or create it
    Up(UpArgs),
    /// Put the interface back on the connection the last `up` displaced
    Restore,
    /// Rollback record and running routing daemons
    Status,
    #[command(subcommand)]
    Profiles(ProfilesCommand),
}

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Mesh profile name under <root>/profiles
    #[arg(long)]
    pub profile: String,

    /// Wireless interface to use (defaults to the first one)
    #[arg(long)]
    pub interface: Option<String>,

    /// Create a new mesh even when a matching one is visible
    #[arg(long)]
    pub create: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProfilesCommand {
    List,
    Show(ProfileNameArgs),
    Save(ProfileSaveArgs),
    Delete(ProfileNameArgs),
}

#[derive(Args, Debug)]
pub struct ProfileNameArgs {
    pub name: String,
}

#[derive(Args, Debug)]
pub struct ProfileSaveArgs {
    pub name: String,

    #[arg(long, default_value = DEFAULT_MESH_SSID)]
    pub ssid: String,

    /// Mesh cell BSSID (defaults to the reserved mesh BSSID)
    #[arg(long)]
    pub bssid: Option<String>,

    /// Pre-shared key; omit for an open mesh
    #[arg(long)]
    pub psk: Option<String>,

    #[arg(long)]
    pub ip: Ipv4Addr,

    #[arg(long, default_value = "255.0.0.0")]
    pub netmask: Ipv4Addr,

    #[arg(long)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_up_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "meshlink", "up", "--profile", "home-mesh", "--create", "--output", "text", "--root", "/tmp/m",
        ])
        .unwrap();
        assert_eq!(cli.output_format, OutputFormat::Text);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/m")));
        match cli.command {
            Commands::Up(args) => {
                assert_eq!(args.profile, "home-mesh");
                assert!(args.create);
                assert!(args.interface.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_profile_save_defaults_ssid_and_netmask() {
        let cli = Cli::try_parse_from([
            "meshlink", "profiles", "save", "m1", "--ip", "5.1.2.3",
        ])
        .unwrap();
        match cli.command {
            Commands::Profiles(ProfilesCommand::Save(args)) => {
                assert_eq!(args.ssid, DEFAULT_MESH_SSID);
                assert_eq!(args.netmask, Ipv4Addr::new(255, 0, 0, 0));
                assert!(args.bssid.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_ip() {
        assert!(Cli::try_parse_from([
            "meshlink", "profiles", "save", "m1", "--ssid", "x", "--ip", "5.1.2",
        ])
        .is_err());
    }
}
