//! `gamebridge discover`

use std::time::Duration;

use clap::Args;

use crate::core::RetryPolicy;
use crate::discovery::DiscoveryClient;
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Discovery endpoint
    #[arg(long)]
    pub url: Option<String>,

    /// Number of attempts before falling back
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Milliseconds per attempt
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

impl DiscoverArgs {
    fn policy(&self, settings: &Settings) -> RetryPolicy {
        let defaults = settings.retry_policy();
        RetryPolicy::new(
            self.attempts.unwrap_or(defaults.max_attempts()),
            self.delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_between_attempts()),
        )
    }
}

pub async fn run(args: DiscoverArgs, settings: &Settings) -> anyhow::Result<()> {
    let url = args.url.clone().unwrap_or_else(|| settings.discovery.url.clone());
    let client = DiscoveryClient::new(url)?;

    let result = client.discover(&args.policy(settings)).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings::default();
        let args = DiscoverArgs {
            url: None,
            attempts: Some(1),
            delay_ms: None,
        };
        assert_eq!(
            args.policy(&settings),
            RetryPolicy::new(1, Duration::from_secs(2))
        );

        let args = DiscoverArgs {
            url: None,
            attempts: None,
            delay_ms: Some(250),
        };
        assert_eq!(
            args.policy(&settings),
            RetryPolicy::new(5, Duration::from_millis(250))
        );
    }
}
