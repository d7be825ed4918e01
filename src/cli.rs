use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "sbom-parsers",
    about = "Discover project dependency graphs for SBOM generation",
    version
)]
pub struct Cli {
    /// Project path to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Config file [default: ./.sbom-parsers/config.toml, fallback ~/.config/sbom-parsers/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maven global settings file, passed to `mvn -gs`
    #[arg(long, value_name = "FILE")]
    pub global_settings: Option<PathBuf>,

    /// Skip registry lookups
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(long, default_value = "tree", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    pub log_level: String,

    /// Only print the summary table
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Tree,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["sbom-parsers"]);
        assert_eq!(cli.path, PathBuf::from("."));
        assert_eq!(cli.format, OutputFormat::Tree);
        assert_eq!(cli.log_level, "warn");
        assert!(!cli.offline);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "sbom-parsers",
            "/work/app",
            "--offline",
            "--format",
            "json",
            "--global-settings",
            "/etc/maven/settings.xml",
        ]);
        assert_eq!(cli.path, PathBuf::from("/work/app"));
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.global_settings, Some(PathBuf::from("/etc/maven/settings.xml")));
        assert!(cli.offline);
    }
}
