//! `--flag=value` argument lists on named containers.

use crate::error::{Error, Result};
use crate::models::ManifestObject;

/// Value of the first argument carrying `prefix`, with the prefix stripped.
pub fn find<'a>(object: &'a ManifestObject, container: &str, prefix: &str) -> Result<&'a str> {
    let found = object
        .container(container)
        .ok_or_else(|| Error::ContainerNotFound {
            object: object.key(),
            container: container.to_string(),
        })?;

    find_arg(&found.args, prefix).ok_or_else(|| Error::ArgumentNotFound {
        container: container.to_string(),
        prefix: prefix.to_string(),
    })
}

/// Replace the first argument carrying `prefix` in place, or append one.
pub fn upsert(object: &mut ManifestObject, container: &str, prefix: &str, value: &str) -> Result<()> {
    let key = object.key();
    let found = object
        .container_mut(container)
        .ok_or_else(|| Error::ContainerNotFound {
            object: key,
            container: container.to_string(),
        })?;

    upsert_arg(&mut found.args, prefix, value);
    Ok(())
}

pub fn find_arg<'a>(args: &'a [String], prefix: &str) -> Option<&'a str> {
    args.iter().find_map(|arg| arg.strip_prefix(prefix))
}

/// Leaves exactly one argument with `prefix`: the first occurrence keeps its
/// position, later duplicates are dropped.
pub fn upsert_arg(args: &mut Vec<String>, prefix: &str, value: &str) {
    let entry = format!("{}{}", prefix, value);
    match args.iter().position(|arg| arg.starts_with(prefix)) {
        Some(first) => {
            args[first] = entry;
            let mut index = 0;
            args.retain(|arg| {
                let keep = index <= first || !arg.starts_with(prefix);
                index += 1;
                keep
            });
        }
        None => args.push(entry),
    }
}
