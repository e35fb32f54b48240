use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "embed-lens")]
#[command(about = "Render a note with its embeds and drive the embed overlay")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault directory
    #[arg(short = 'V', long, global = true, env = "EMBED_LENS_VAULT", default_value = ".")]
    pub vault: PathBuf,

    /// Settings file (defaults to ~/.config/crucible/embed-lens.json)
    #[arg(short = 'S', long, global = true)]
    pub settings: Option<PathBuf>,

    /// Debug logging and verbose pass reports
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a note and print the augmented tree
    Render {
        /// Note to open, as a link (`Daily` or `journal/Daily.md`)
        note: String,
    },

    /// List the augmented embed blocks of a note
    Blocks {
        /// Note to open
        note: String,
    },

    /// Collapse or expand a block and persist the flag
    Toggle {
        /// Note to open
        note: String,
        /// Block identity, or its 1-based position in `blocks`
        block: String,
    },

    /// Replace the content of an embedded note through its edit session
    Edit {
        /// Note to open
        note: String,
        /// Block identity, or its 1-based position in `blocks`
        block: String,
        /// New content
        #[arg(long, conflicts_with = "from_file")]
        content: Option<String>,
        /// Read the new content from a file
        #[arg(long)]
        from_file: Option<PathBuf>,
    },

    /// Print where the jump button of a block would navigate
    Jump {
        /// Note to open
        note: String,
        /// Block identity, or its 1-based position in `blocks`
        block: String,
    },

    /// Run the settle and bootstrap machinery again and report what changed
    Reconcile {
        /// Note to open
        note: String,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Print the JSON schema of the settings blob
    Schema,
    /// Set one field, e.g. `autoSaveDelay=2000` or `fontSize=16px`
    Set {
        /// `field=value` with the camelCase field name
        assignment: String,
    },
    /// Forget every collapse flag
    ClearCollapsed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edit_with_content() {
        let cli = Cli::parse_from([
            "embed-lens",
            "--vault",
            "/tmp/vault",
            "edit",
            "Daily",
            "2",
            "--content",
            "new text",
        ]);
        assert_eq!(cli.vault, PathBuf::from("/tmp/vault"));
        match cli.command {
            Commands::Edit {
                note,
                block,
                content,
                from_file,
            } => {
                assert_eq!(note, "Daily");
                assert_eq!(block, "2");
                assert_eq!(content.as_deref(), Some("new text"));
                assert!(from_file.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_content_and_file_conflict() {
        let parsed = Cli::try_parse_from([
            "embed-lens",
            "edit",
            "Daily",
            "1",
            "--content",
            "x",
            "--from-file",
            "y.md",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_settings_set() {
        let cli = Cli::parse_from(["embed-lens", "settings", "set", "fontSize=16px"]);
        assert!(matches!(
            cli.command,
            Commands::Settings {
                command: SettingsCommand::Set { .. }
            }
        ));
    }
}
