//! Renders a configuration into the agent JSON the simulator accepts.

use serde_json::{Map, Value};
use sh_types::{validation_error, Configuration, HpoResult, ParameterValue};

use crate::agents::{AgentVariant, AGENT_KEY, PREFIX_LEN};

/// `{"<Variant>": {<parameter>: <value>, ...}}` for the variant the
/// configuration selects.
///
/// The selector itself and null values are left out and every parameter
/// loses its two-character variant prefix.
pub fn render_payload(configuration: &Configuration) -> HpoResult<Value> {
    let variant: AgentVariant = configuration
        .get(AGENT_KEY)
        .and_then(ParameterValue::as_str)
        .ok_or_else(|| validation_error!("configuration has no {AGENT_KEY:?} selector"))?
        .parse()?;

    let mut parameters = Map::new();
    for (name, value) in configuration {
        if name == AGENT_KEY || value.is_null() {
            continue;
        }
        if !name.starts_with(variant.prefix()) || name.len() <= PREFIX_LEN {
            return Err(validation_error!(
                "parameter {name:?} does not belong to the {variant} agent"
            ));
        }
        parameters.insert(name[PREFIX_LEN..].to_string(), serde_json::to_value(value)?);
    }

    let mut payload = Map::new();
    payload.insert(variant.name().to_string(), Value::Object(parameters));
    Ok(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::build_space;
    use serde_json::json;

    #[test]
    fn default_flood_payload() {
        let config = build_space(&[AgentVariant::Flood]).default_configuration();
        let payload = render_payload(&config).unwrap();

        let flood = payload["Flood"].as_object().unwrap();
        assert_eq!(payload.as_object().unwrap().len(), 1);
        assert_eq!(flood.len(), 12);
        assert_eq!(flood["board_control"], json!(0.9));
        assert_eq!(flood["len_advantage_offset"], json!(0.0));
        assert!(!flood.contains_key("agent"));
    }

    #[test]
    fn mobility_payload_keeps_integers() {
        let config = Configuration::new()
            .with(AGENT_KEY, "Mobility")
            .with("m_health_threshold", 35i64)
            .with("m_min_len", 8i64)
            .with("m_first_move_cost", 1.0);
        let payload = render_payload(&config).unwrap();
        assert_eq!(
            payload,
            json!({"Mobility": {"health_threshold": 35, "min_len": 8, "first_move_cost": 1.0}})
        );
    }

    #[test]
    fn zero_values_are_kept_and_nulls_dropped() {
        let config = Configuration::new()
            .with(AGENT_KEY, "Tree")
            .with("t_mobility_decay", 0.0)
            .with("t_health", ParameterValue::Null);
        let payload = render_payload(&config).unwrap();
        assert_eq!(payload, json!({"Tree": {"mobility_decay": 0.0}}));
    }

    #[test]
    fn foreign_prefix_is_rejected() {
        let config = Configuration::new()
            .with(AGENT_KEY, "Flood")
            .with("t_health", 0.5);
        let err = render_payload(&config).unwrap_err();
        assert!(err.to_string().contains("t_health"));
    }

    #[test]
    fn missing_or_unknown_selector_is_rejected() {
        assert!(render_payload(&Configuration::new().with("f_health", 0.1)).is_err());
        assert!(render_payload(&Configuration::new().with(AGENT_KEY, "Minimax")).is_err());
    }
}
