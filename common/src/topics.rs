pub const TOPIC_PREFIX: &str = "arbiter";

pub const TOPIC_CMD_ROOM_FILTER: &str = "arbiter/cmnd/room/+/+";
pub const TOPIC_CONTEXT_STATE: &str = "arbiter/context/state";

pub const ATTRIBUTE_TEMPERATURE: &str = "temperature";

pub fn room_status_topic(index: usize) -> String {
    format!("{TOPIC_PREFIX}/room/{index}/status")
}

pub fn switch_state_topic(index: usize) -> String {
    format!("{TOPIC_PREFIX}/switch/{index}/state")
}

pub fn climate_mode_topic(entity_id: &str) -> String {
    format!("{TOPIC_PREFIX}/cmnd/climate/{entity_id}/hvac_mode")
}

pub fn climate_temperature_topic(entity_id: &str) -> String {
    format!("{TOPIC_PREFIX}/cmnd/climate/{entity_id}/{ATTRIBUTE_TEMPERATURE}")
}

pub fn statestream_filter(base: &str) -> String {
    format!("{}/#", base.trim_end_matches('/'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomField {
    Mode,
    Target,
}

/// Parses `arbiter/cmnd/room/<index>/<mode|target>`.
pub fn parse_room_command(topic: &str) -> Option<(usize, RoomField)> {
    let rest = topic.strip_prefix(TOPIC_PREFIX)?.strip_prefix("/cmnd/room/")?;
    let (index, field) = rest.split_once('/')?;
    let field = match field {
        "mode" => RoomField::Mode,
        "target" => RoomField::Target,
        _ => return None,
    };
    Some((index.parse().ok()?, field))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatestreamUpdate {
    State { entity_id: String },
    Attribute { entity_id: String, attribute: String },
}

/// Parses `<base>/<domain>/<object_id>/state` and
/// `<base>/<domain>/<object_id>/<attribute>`.
pub fn parse_statestream(base: &str, topic: &str) -> Option<StatestreamUpdate> {
    let rest = topic
        .strip_prefix(base.trim_end_matches('/'))?
        .strip_prefix('/')?;
    let mut parts = rest.splitn(3, '/');
    let domain = parts.next().filter(|s| !s.is_empty())?;
    let object_id = parts.next().filter(|s| !s.is_empty())?;
    let leaf = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;

    let entity_id = format!("{domain}.{object_id}");
    Some(if leaf == "state" {
        StatestreamUpdate::State { entity_id }
    } else {
        StatestreamUpdate::Attribute {
            entity_id,
            attribute: leaf.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_room_commands() {
        assert_eq!(
            parse_room_command("arbiter/cmnd/room/3/target"),
            Some((3, RoomField::Target))
        );
        assert_eq!(parse_room_command("arbiter/cmnd/room/x/mode"), None);
        assert_eq!(parse_room_command("arbiter/cmnd/room/1/hold"), None);
    }

    #[test]
    fn statestream_topics_map_to_entities() {
        assert_eq!(
            parse_statestream("homeassistant/", "homeassistant/sensor/living_temp/state"),
            Some(StatestreamUpdate::State {
                entity_id: "sensor.living_temp".to_string()
            })
        );
        assert_eq!(
            parse_statestream("homeassistant", "homeassistant/climate/daikin/temperature"),
            Some(StatestreamUpdate::Attribute {
                entity_id: "climate.daikin".to_string(),
                attribute: "temperature".to_string()
            })
        );
        assert_eq!(parse_statestream("homeassistant", "homeassistant/sensor/x"), None);
        assert_eq!(parse_statestream("homeassistant", "other/sensor/x/state"), None);
    }
}
