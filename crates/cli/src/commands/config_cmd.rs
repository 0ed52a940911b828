//! `taskweave config`: Configuration management commands.

use taskweave_config::OrchestratorConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match OrchestratorConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if config.scheduler.task_max_iterations > config.iteration.max_iterations {
                warnings.push("scheduler.task_max_iterations exceeds iteration.max_iterations");
            }
            if config.scheduler.task_timeout_secs < config.iteration.oracle_timeout_secs {
                warnings.push("scheduler.task_timeout_secs is shorter than one oracle call");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Iterations:   {}", config.iteration.max_iterations);
            println!("   Concurrency:  {}", config.scheduler.concurrency);
            println!("   Attempts:     {}", config.reflexion.max_attempts);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = OrchestratorConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = OrchestratorConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
