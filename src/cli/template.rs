use anyhow::{Context, Result};

const BROKER_TEMPLATE: &str = include_str!("../../templates/broker-template.toml");

/// Generate configuration template
pub fn generate_config_template(output: Option<&str>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, BROKER_TEMPLATE)
            .with_context(|| format!("Failed to write config template to {}", path))?;
        println!("Generated broker configuration template: {}", path);
    } else {
        println!("{}", BROKER_TEMPLATE);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;

    #[test]
    fn test_template_is_valid_config() {
        let config = BrokerConfig::from_toml_str(BROKER_TEMPLATE).unwrap();
        assert_eq!(config, {
            let mut expected = BrokerConfig::default();
            expected.connect_timeout_ms = Some(5000);
            expected.handshake_timeout_ms = Some(2000);
            expected
        });
    }

    #[test]
    fn test_write_template() {
        let path = std::env::temp_dir().join(format!("tcp-broker-template-{}.toml", std::process::id()));
        generate_config_template(path.to_str()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, BROKER_TEMPLATE);
        let _ = std::fs::remove_file(&path);
    }
}
