// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles command lines given as non-empty argument lists.

use nonempty::NonEmpty;
use serde::Deserialize;

pub fn deserialize_command<'de, D>(deserializer: D) -> Result<NonEmpty<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let args: Vec<String> = Vec::deserialize(deserializer)?;
    into_command(args).map_err(serde::de::Error::custom)
}

pub fn deserialize_command_option<'de, D>(
    deserializer: D,
) -> Result<Option<NonEmpty<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<Vec<String>> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(args) => into_command(args)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn into_command(args: Vec<String>) -> Result<NonEmpty<String>, &'static str> {
    let command = NonEmpty::from_vec(args).ok_or("command cannot be empty")?;
    if command.head.trim().is_empty() {
        return Err("command program cannot be blank");
    }
    Ok(command)
}
