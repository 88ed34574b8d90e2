//! `chctl cfg-info`: reads a ClickHouse server config file and prints it as JSON.
//!
//! Files ending in `.xml` are parsed as XML with the root element unwrapped,
//! everything else is parsed as YAML. XML carries no types, so scalar values
//! that look like booleans or numbers are converted after parsing.

use crate::args::CfgInfoArgs;
use crate::commands::Out;
use crate::Result;
use anyhow::{bail, Context};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::path::Path;

// Bounds recursion when a config abuses YAML anchors or XML nesting.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Serialize)]
pub struct CfgReport {
    config: Value,
}

fn is_xml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "xml")
}

/// Converts string scalars to bool/int/float where they parse as such. XML
/// attribute values and element text always arrive as strings.
fn convert(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, convert(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(convert).collect()),
        Value::String(s) => convert_scalar(s),
        other => other,
    }
}

fn convert_scalar(s: String) -> Value {
    match s.as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(i) = s.parse::<i64>() {
                Value::Number(Number::from(i))
            } else if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
                Value::Number(n)
            } else {
                Value::String(s)
            }
        }
    }
}

fn yaml_to_json(value: &serde_yaml::Value, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        bail!("The config structure is nested too deeply, possibly through recursive aliases");
    }
    let converted = match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(Number::from(i))
            } else if let Some(u) = n.as_u64() {
                Value::Number(Number::from(u))
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .context("Could not represent a YAML number as JSON")?
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .iter()
                .map(|item| yaml_to_json(item, depth + 1))
                .collect::<Result<Vec<Value>>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = key
                    .as_str()
                    .map(String::from)
                    .or_else(|| key.as_i64().map(|i| i.to_string()))
                    .or_else(|| key.as_bool().map(|b| b.to_string()))
                    .context("The config contains a mapping key that is not a scalar")?;
                map.insert(key, yaml_to_json(value, depth + 1)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value, depth + 1)?,
    };
    Ok(converted)
}

fn load_yaml(content: &str) -> Result<Value> {
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(content).context("Could not parse the config as YAML")?;
    yaml_to_json(&parsed, 0)
}

/// Merges a child element into its parent's map. A repeated element name turns
/// the entry into an array, matching how ClickHouse configs use repetition.
fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

fn element_attributes(start: &BytesStart) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for attr in start.attributes() {
        let attr = attr.context("Could not parse the config as XML")?;
        let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
        let value = attr
            .unescape_value()
            .context("Could not parse the config as XML")?;
        map.insert(key, Value::String(value.into_owned()));
    }
    Ok(map)
}

fn parse_element(reader: &mut Reader<&[u8]>, start: &BytesStart, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        bail!("The config structure is nested too deeply");
    }
    let mut map = element_attributes(start)?;
    let mut text = String::new();
    loop {
        match reader
            .read_event()
            .context("Could not parse the config as XML")?
        {
            Event::Start(child) => {
                let name = String::from_utf8_lossy(child.name().as_ref()).into_owned();
                let value = parse_element(reader, &child, depth + 1)?;
                insert_child(&mut map, name, value);
            }
            Event::Empty(child) => {
                let name = String::from_utf8_lossy(child.name().as_ref()).into_owned();
                let attrs = element_attributes(&child)?;
                let value = if attrs.is_empty() {
                    Value::Null
                } else {
                    Value::Object(attrs)
                };
                insert_child(&mut map, name, value);
            }
            Event::Text(t) => {
                text.push_str(&t.unescape().context("Could not parse the config as XML")?)
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => break,
            Event::Eof => bail!("Unexpected end of the XML config"),
            _ => {}
        }
    }
    let text = text.trim();
    if map.is_empty() {
        if text.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(Value::String(text.to_string()))
        }
    } else {
        if !text.is_empty() {
            map.insert("#text".to_string(), Value::String(text.to_string()));
        }
        Ok(Value::Object(map))
    }
}

/// Parses an XML config and returns the content of the root element, i.e. the
/// `<clickhouse>` wrapper does not show up in the output.
fn load_xml(content: &str) -> Result<Value> {
    let mut reader = Reader::from_reader(content.as_bytes());
    loop {
        match reader
            .read_event()
            .context("Could not parse the config as XML")?
        {
            Event::Start(start) => {
                let root = parse_element(&mut reader, &start, 0)?;
                return Ok(convert(root));
            }
            Event::Empty(_) => return Ok(Value::Null),
            Event::Eof => bail!("The XML config has no root element"),
            _ => {}
        }
    }
}

pub async fn cfg_info(args: &CfgInfoArgs) -> Result<Out<CfgReport>> {
    let path = args.path();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Could not open/load from file {}", path.display()))?;
    let config = if is_xml(path) {
        load_xml(&content)?
    } else {
        load_yaml(&content)?
    };
    Ok(Out::with_data(false, vec![], CfgReport { config }))
}
