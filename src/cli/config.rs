use clap::{Args, Subcommand};

use super::CliContext;
use botflow::config::{ConfigManager, S3_ACCESS_KEY, S3_SECRET_KEY};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Add or update a value in `<root>/config/.env`
    Set { key: String, value: String },
    Delete { key: String },
    /// Show the stored values, credentials masked
    List,
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Set { key, value } => {
            match context.config_manager.0.set(&key, &value).await {
                Ok(_) => println!("✅ Config `{key}` saved. Restart `botflow serve` to apply it."),
                Err(e) => eprintln!("❌ Config could not be saved: {e}"),
            }
            Ok(())
        }
        ConfigCommands::Delete { key } => {
            context.config_manager.0.del(&key).await;
            println!("✅ Config `{key}` deleted.");
            Ok(())
        }
        ConfigCommands::List => {
            for line in list_lines(&context.config_manager).await {
                println!("{line}");
            }
            Ok(())
        }
    }
}

async fn list_lines(config: &ConfigManager) -> Vec<String> {
    let mut entries = config.0.as_vec().await;
    entries.sort();
    entries
        .into_iter()
        .map(|(key, value)| {
            if key == S3_SECRET_KEY || key == S3_ACCESS_KEY {
                format!("{key}=***")
            } else {
                format!("{key}={value}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use botflow::config::MapConfigManager;
    use std::path::PathBuf;

    fn context() -> CliContext {
        CliContext::new(
            PathBuf::from("./botflow"),
            ConfigManager(MapConfigManager::new()),
        )
    }

    #[tokio::test]
    async fn test_set_list_and_delete() {
        let context = context();
        let set = |key: &str, value: &str| ConfigArgs {
            command: ConfigCommands::Set {
                key: key.into(),
                value: value.into(),
            },
        };

        execute(set("S3_BUCKET", "bots"), &context).await.unwrap();
        execute(set(S3_SECRET_KEY, "hunter2"), &context).await.unwrap();
        assert_eq!(
            list_lines(&context.config_manager).await,
            vec!["S3_BUCKET=bots".to_string(), "S3_SECRET_KEY=***".to_string()]
        );

        let delete = ConfigArgs {
            command: ConfigCommands::Delete {
                key: "S3_BUCKET".into(),
            },
        };
        execute(delete, &context).await.unwrap();
        assert_eq!(
            list_lines(&context.config_manager).await,
            vec!["S3_SECRET_KEY=***".to_string()]
        );
    }
}
