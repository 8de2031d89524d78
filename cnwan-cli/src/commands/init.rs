//! `cnwan init --project <p> --region <r> [--api-base-url <url>] [--token-env <VAR>]`

use anyhow::{Context, Result};
use clap::Args;

use cnwan_core::{settings, Settings};

/// Write `~/.cnwan/settings.yaml`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Target project id.
    #[arg(long, short = 'p')]
    pub project: String,

    /// Target region (location) inside the project.
    #[arg(long, short = 'r')]
    pub region: String,

    /// Base URL of the registry REST API.
    #[arg(long, value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Environment variable that holds the bearer token.
    #[arg(long, value_name = "VAR")]
    pub token_env: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;

        let mut settings = Settings::new(self.project, self.region);
        if let Some(url) = self.api_base_url {
            settings.api_base_url = url;
        }
        if let Some(var) = self.token_env {
            settings.token_env = var;
        }

        let path = settings::save_settings_at(&home, &settings)
            .context("failed to write settings")?;

        println!(
            "✓ Targeting projects/{}/locations/{}",
            settings.project, settings.region
        );
        println!("  API:      {}", settings.api_base_url);
        println!("  Token:    ${}", settings.token_env);
        println!("  Saved to: {}", path.display());
        Ok(())
    }
}
