use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, params_from,
};
use crate::foundation::core::StreamMask;
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use serde::{Deserialize, Serialize};
use std::process::Command;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    command: String,
    monitor: bool,
}

/// External program stage: runs a user command when refreshed, relaying
/// its stdout to the console, and passes all payloads through untouched.
///
/// This is the hazardous filter kind: a state file from an untrusted
/// source can carry an arbitrary command, so loads can strip it.
/// With `monitor` set the command's output is assumed volatile and the
/// stage's cache is invalidated on every walk.
#[derive(Clone, Debug, Default)]
pub struct ExternalProgram {
    params: Params,
    label: Option<String>,
    console: Vec<String>,
}

impl ExternalProgram {
    /// Stage running the given shell command.
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            params: Params {
                command: command.into(),
                monitor: false,
            },
            ..Self::default()
        }
    }

    pub(crate) fn from_params(params: &serde_json::Value) -> PointflowResult<Self> {
        Ok(Self {
            params: params_from(params)?,
            ..Self::default()
        })
    }
}

impl Filter for ExternalProgram {
    fn kind(&self) -> FilterKind {
        FilterKind::ExternalProgram
    }

    fn custom_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    fn refresh(
        &mut self,
        inputs: &[StreamHandle],
        _arena: &mut StreamArena,
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<StreamHandle>, FilterError> {
        if !self.params.command.is_empty() {
            let output = if cfg!(windows) {
                Command::new("cmd").args(["/C", &self.params.command]).output()
            } else {
                Command::new("sh").args(["-c", &self.params.command]).output()
            }?;
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                self.console.push(line.to_owned());
            }
            if !output.status.success() {
                return Err(FilterError::Command(format!(
                    "'{}' exited with {}",
                    self.params.command, output.status
                )));
            }
        }
        ctx.tick()?;
        Ok(inputs.to_vec())
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::EMPTY
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::EMPTY
    }

    fn cache_bytes(&self, _n_objects: u64) -> Option<u64> {
        // Nothing of our own to cache; side effects cannot be replayed.
        None
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        vec![PropertyGroup {
            title: "command",
            props: vec![
                Property {
                    key: "command",
                    value: PropertyValue::Str(self.params.command.clone()),
                },
                Property {
                    key: "monitor",
                    value: PropertyValue::Bool(self.params.monitor),
                },
            ],
        }]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> PointflowResult<PropertyOutcome> {
        match key {
            "command" => self.params.command = value.as_str()?.to_owned(),
            "monitor" => self.params.monitor = value.as_bool()?,
            _ => {
                return Err(PointflowError::validation(format!(
                    "external program has no property '{key}'"
                )));
            }
        }
        Ok(PropertyOutcome::refresh_all())
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(Self {
            console: Vec::new(),
            ..self.clone()
        })
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("external params serialize")
    }

    fn monitor_needs_refresh(&self) -> bool {
        self.params.monitor
    }

    fn hazardous(&self) -> bool {
        true
    }

    fn console_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }
}
