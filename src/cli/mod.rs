//! Defines fieldsync's CLI through clap types.

mod attach;
mod serve;

use std::{
    borrow::Cow,
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::Parser;
use thiserror::Error;

pub use self::attach::AttachCommand;
pub use self::serve::ServeCommand;

/// Command line options that fieldsync accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "fieldsync", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// Subcommand to run in this invocation.
    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Serve(subcommand) => subcommand.run(),
            Subcommand::Attach(subcommand) => subcommand.run(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Serve(ServeCommand),
    Attach(AttachCommand),
}

impl Subcommand {
    /// The config file this invocation reads, if any. Logging looks here for
    /// its settings before the command runs.
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Subcommand::Serve(cmd) => Some(&cmd.config),
            Subcommand::Attach(_) => None,
        }
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            Subcommand::Serve(_) => "serve",
            Subcommand::Attach(_) => "attach",
        }
    }
}

/// Makes a relative path absolute against the working directory. If the
/// working directory can't be determined the path is returned unchanged.
pub fn resolve_path(path: &Path) -> Cow<'_, Path> {
    if path.is_absolute() {
        return Cow::Borrowed(path);
    }

    match env::current_dir() {
        Ok(dir) => Cow::Owned(dir.join(path)),
        Err(_) => Cow::Borrowed(path),
    }
}

/// The directory logs are kept under: the directory holding the config file.
pub fn log_root(config_path: &Path) -> PathBuf {
    let resolved = resolve_path(config_path);

    resolved
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| resolved.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_overrides() {
        let options = Options::try_parse_from([
            "fieldsync",
            "serve",
            "--file",
            "notes.txt",
            "--port",
            "9000",
            "-vv",
        ])
        .unwrap();

        assert_eq!(options.global.verbosity, 2);
        assert_eq!(options.subcommand.command_name(), "serve");

        let Subcommand::Serve(serve) = options.subcommand else {
            panic!("expected serve");
        };
        assert_eq!(serve.file, Some(PathBuf::from("notes.txt")));
        assert_eq!(serve.port, Some(9000));
        assert_eq!(serve.config, PathBuf::from("config.json"));
    }

    #[test]
    fn attach_defaults_to_local_daemon() {
        let options = Options::try_parse_from(["fieldsync", "attach"]).unwrap();

        let Subcommand::Attach(attach) = options.subcommand else {
            panic!("expected attach");
        };
        assert_eq!(attach.url, "ws://localhost:8080");
    }

    #[test]
    fn color_choice_rejects_unknown_values() {
        assert_eq!("never".parse::<ColorChoice>().unwrap(), ColorChoice::Never);
        assert!("sometimes".parse::<ColorChoice>().is_err());
    }

    #[test]
    fn resolve_path_keeps_absolute_paths() {
        let absolute = env::temp_dir().join("x.txt");
        assert_eq!(resolve_path(&absolute).as_ref(), absolute.as_path());
        assert!(resolve_path(Path::new("x.txt")).is_absolute());
    }

    #[test]
    fn log_root_is_config_directory() {
        let config = env::temp_dir().join("fieldsync").join("config.json");
        assert_eq!(log_root(&config), env::temp_dir().join("fieldsync"));
    }
}
