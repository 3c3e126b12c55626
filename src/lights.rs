//! Dimmable light resources and the representations pushed to observers.

use crate::actuator::OutputSink;
use crate::cbor::{Map, Value};
use crate::config::{Config, ResourceConfig};
use crate::logutil::escape_log;
use crate::oic::{OicResource, OicServer, RegistryError, SendCallback, UpdateError, UpdateHandler};
use log::{info, warn};
use std::sync::Arc;

pub const DIMMING_SETTING: &str = "dimmingSetting";
pub const DIMMING_RANGE: &str = "0,255";
pub const COLOUR_RESOURCE_TYPE: &str = "oic.r.colour.rgb";

/// Resource names containing this marker are reported with the colour schema.
const AMBIENT_MARKER: &str = "ambient";

/// Initial cached representation of a dimmable light.
pub fn dimming_representation(resource_type: &str, value: i64) -> Map {
    let mut rep = Map::new();
    rep.append("rt", resource_type);
    rep.append(DIMMING_SETTING, value);
    rep.append("range", DIMMING_RANGE);
    rep
}

/// Update behavior of a light: store the requested level and drive the
/// output channel wired to the lamp.
pub struct DimmingUpdate {
    channel: u8,
    label: String,
    sink: Arc<dyn OutputSink>,
}

impl DimmingUpdate {
    pub fn new(channel: u8, label: impl Into<String>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            channel,
            label: label.into(),
            sink,
        }
    }
}

impl UpdateHandler for DimmingUpdate {
    fn on_update(&mut self, representation: &mut Map, update: &Map) -> Result<(), UpdateError> {
        let value = match update.get(DIMMING_SETTING) {
            Some(Value::Integer(v)) => *v,
            Some(_) => {
                return Err(UpdateError::WrongType {
                    field: DIMMING_SETTING.to_string(),
                    expected: "an integer",
                })
            }
            None => return Err(UpdateError::MissingField(DIMMING_SETTING.to_string())),
        };
        representation.insert(DIMMING_SETTING, value);
        if !(0..=255).contains(&value) {
            warn!("{} set to {} outside {}; forwarding as-is", self.label, value, DIMMING_RANGE);
        }
        info!("{} updated {}", self.label, value);
        self.sink.set_output(self.channel, value);
        Ok(())
    }
}

/// One light resource per configured entry.
pub fn build_resources(config: &Config, sink: Arc<dyn OutputSink>) -> Vec<OicResource> {
    config
        .resources
        .iter()
        .map(|rc| light_resource(rc, sink.clone()))
        .collect()
}

fn light_resource(rc: &ResourceConfig, sink: Arc<dyn OutputSink>) -> OicResource {
    OicResource::new(
        rc.path.as_str(),
        rc.resource_type.as_str(),
        rc.interface.as_str(),
        DimmingUpdate::new(rc.channel, rc.display_label(), sink),
        dimming_representation(&rc.resource_type, rc.initial_setting),
    )
}

/// Registry for the configured device with every light registered. The
/// registry is not started.
pub fn build_server(
    config: &Config,
    send: SendCallback,
    sink: Arc<dyn OutputSink>,
) -> Result<OicServer, RegistryError> {
    let mut server = OicServer::new(config.device.name.as_str(), config.device.uuid.as_str(), send);
    for resource in build_resources(config, sink) {
        server.add_resource(resource)?;
    }
    Ok(server)
}

/// A value announced for a resource by local application state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyValue {
    Integer(i64),
    Text(String),
}

impl NotifyValue {
    /// Integers parse as such, anything else is kept as text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(v) => NotifyValue::Integer(v),
            Err(_) => NotifyValue::Text(raw.to_string()),
        }
    }
}

impl std::fmt::Display for NotifyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyValue::Integer(v) => write!(f, "{}", v),
            NotifyValue::Text(s) => f.write_str(s),
        }
    }
}

/// Representation pushed to observers of `name`. Ambient lights use the
/// colour schema with a string setting; all others the dimming schema, where
/// text that is not an integer becomes 0.
pub fn observer_representation(name: &str, value: &NotifyValue) -> Map {
    if name.contains(AMBIENT_MARKER) {
        let mut rep = Map::new();
        rep.append("rt", COLOUR_RESOURCE_TYPE);
        rep.append(DIMMING_SETTING, value.to_string());
        return rep;
    }
    let level = match value {
        NotifyValue::Integer(v) => *v,
        NotifyValue::Text(s) => {
            warn!("Notification value '{}' for {} is not an integer; sending 0", escape_log(s), escape_log(name));
            0
        }
    };
    dimming_representation(crate::config::DIMMING_RESOURCE_TYPE, level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::Packet;
    use crate::config::DIMMING_RESOURCE_TYPE;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u8, i64)>>);

    impl OutputSink for Recorder {
        fn set_output(&self, channel: u8, value: i64) {
            self.0.lock().unwrap().push((channel, value));
        }
    }

    fn level(v: Value) -> Map {
        let mut m = Map::new();
        m.append(DIMMING_SETTING, v);
        m
    }

    #[test]
    fn accepted_update_drives_its_channel_once() {
        let rec = Arc::new(Recorder::default());
        let mut res = light_resource(&ResourceConfig::dimming("/lampa/table", "Table", 2), rec.clone());
        res.apply_update(&level(Value::Integer(180))).unwrap();
        assert_eq!(*rec.0.lock().unwrap(), vec![(2, 180)]);
        assert_eq!(res.representation().get(DIMMING_SETTING), Some(&Value::Integer(180)));
        assert_eq!(res.representation().get("range").and_then(Value::as_str), Some(DIMMING_RANGE));
    }

    #[test]
    fn rejected_update_does_not_touch_the_actuator() {
        let rec = Arc::new(Recorder::default());
        let mut res = light_resource(&ResourceConfig::dimming("/lampa/floor", "Floor", 1), rec.clone());
        assert!(res.apply_update(&Map::new()).is_err());
        assert!(res.apply_update(&level(Value::Text("high".into()))).is_err());
        assert!(rec.0.lock().unwrap().is_empty());
        assert_eq!(res.representation().get(DIMMING_SETTING), Some(&Value::Integer(5)));
    }

    #[test]
    fn out_of_range_level_is_forwarded() {
        let rec = Arc::new(Recorder::default());
        let mut res = light_resource(&ResourceConfig::dimming("/lampa/floor", "Floor", 1), rec.clone());
        res.apply_update(&level(Value::Integer(300))).unwrap();
        assert_eq!(*rec.0.lock().unwrap(), vec![(1, 300)]);
    }

    #[test]
    fn default_config_builds_three_lamps() {
        let rec: Arc<dyn OutputSink> = Arc::new(Recorder::default());
        let server = build_server(&Config::default(), Box::new(|_: &Packet| {}), rec).unwrap();
        let paths: Vec<&str> = server.resources().map(|r| r.path()).collect();
        assert_eq!(paths, vec!["/lampa/floor", "/lampa/kuchnia", "/lampa/table"]);
        assert!(!server.is_started());
    }

    #[test]
    fn ambient_names_use_colour_schema() {
        let rep = observer_representation("/lampa/ambient", &NotifyValue::parse("255,128,0"));
        assert_eq!(rep.get("rt").and_then(Value::as_str), Some(COLOUR_RESOURCE_TYPE));
        assert_eq!(rep.get(DIMMING_SETTING).and_then(Value::as_str), Some("255,128,0"));
        assert!(rep.get("range").is_none());

        // numbers are carried as text as well
        let rep = observer_representation("ambient", &NotifyValue::Integer(7));
        assert_eq!(rep.get(DIMMING_SETTING).and_then(Value::as_str), Some("7"));
    }

    #[test]
    fn other_names_use_dimming_schema() {
        let rep = observer_representation("/lampa/floor", &NotifyValue::parse(" 42 "));
        assert_eq!(rep.get("rt").and_then(Value::as_str), Some(DIMMING_RESOURCE_TYPE));
        assert_eq!(rep.get(DIMMING_SETTING), Some(&Value::Integer(42)));
        assert_eq!(rep.get("range").and_then(Value::as_str), Some(DIMMING_RANGE));

        let rep = observer_representation("/lampa/floor", &NotifyValue::parse("dim"));
        assert_eq!(rep.get(DIMMING_SETTING), Some(&Value::Integer(0)));
        assert_eq!(rep.get("rt").and_then(Value::as_str), Some(DIMMING_RESOURCE_TYPE));
    }
}
