//! Construction of the `StartTransientUnit` request for a new pane scope.

use crate::slice::SliceResolver;
use crate::{Error, Result, ScopeOptions, ScopeTarget, util};

use rand::RngCore;
use zbus::zvariant::{OwnedValue, Value};

/// Start mode sent with every request: refuse to replace a queued job for the same unit.
pub const START_MODE: &str = "fail";

pub(crate) type PropertyList = Vec<(String, OwnedValue)>;
pub(crate) type AuxUnits = Vec<(String, Vec<(String, OwnedValue)>)>;

/// Outgoing `StartTransientUnit(s name, s mode, a(sv) properties, a(sa(sv)) aux)` call.
#[derive(Debug)]
pub struct TransientUnitRequest {
    name: String,
    mode: String,
    properties: PropertyList,
    aux: AuxUnits,
    slice: String,
    slice_fallback: bool,
}

impl TransientUnitRequest {
    /// Generated unit name, `<prefix><uuid>.scope`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Properties in the order they are sent.
    pub fn properties(&self) -> &[(String, OwnedValue)] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&OwnedValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// The `Slice=` value carried by the request.
    pub fn slice(&self) -> &str {
        &self.slice
    }

    /// Whether the slice is the configured fallback rather than the parent's own.
    pub fn slice_is_fallback(&self) -> bool {
        self.slice_fallback
    }

    pub fn aux(&self) -> &[(String, Vec<(String, OwnedValue)>)] {
        &self.aux
    }

    /// Message body as sent over the bus.
    pub(crate) fn to_dbus_args(&self) -> Result<(String, String, PropertyList, AuxUnits)> {
        let mut properties = PropertyList::with_capacity(self.properties.len());
        for (k, v) in &self.properties {
            let v = v
                .try_clone()
                .map_err(|e| Error::build("append to bus message", format!("{k}: {e}")))?;
            properties.push((k.clone(), v));
        }
        // aux is unused by systemd but must be present.
        Ok((self.name.clone(), self.mode.clone(), properties, AuxUnits::new()))
    }
}

/// Build the request placing `target.pid` into a fresh scope.
///
/// Every encoding step is fatal on failure, except the parent slice lookup, which falls back to
/// `opts.fallback_slice`.
pub fn build_start_transient_unit(
    target: &ScopeTarget,
    opts: &ScopeOptions,
    slices: &dyn SliceResolver,
) -> Result<TransientUnitRequest> {
    util::validate_unit_prefix(&opts.unit_prefix)?;
    util::validate_slice_name("fallback slice", &opts.fallback_slice)?;

    let name = generate_unit_name(&opts.unit_prefix)?;
    util::validate_no_control("unit name", &name)
        .map_err(|e| Error::build("append to bus message", e))?;

    let (slice, slice_fallback) = match slices.user_slice(target.parent_pid) {
        Ok(slice) => (slice, false),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                parent_pid = target.parent_pid,
                error = %_e,
                fallback = %opts.fallback_slice,
                "parent slice lookup failed; using fallback"
            );
            (opts.fallback_slice.clone(), true)
        }
    };

    let description = format!(
        "tmux child pane {} launched by process {}",
        target.pid, target.parent_pid
    );

    let mut props = PropertyList::with_capacity(5);
    append_property(&mut props, "Description", description)?;
    // Shells such as bash ignore SIGTERM; make scope teardown send SIGHUP too.
    append_property(&mut props, "SendSIGHUP", true)?;
    append_property(&mut props, "Slice", slice.clone())?;
    append_property(&mut props, "PIDs", vec![target.pid])?;
    append_property(&mut props, "CollectMode", opts.collect_mode.clone())?;

    Ok(TransientUnitRequest {
        name,
        mode: START_MODE.to_string(),
        properties: props,
        aux: AuxUnits::new(),
        slice,
        slice_fallback,
    })
}

pub(crate) fn generate_unit_name(prefix: &str) -> Result<String> {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::build("generate uuid", e))?;
    let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
    Ok(format!("{prefix}{}.scope", id.hyphenated()))
}

fn append_property<T>(props: &mut PropertyList, name: &'static str, v: T) -> Result<()>
where
    Value<'static>: From<T>,
{
    let value: Value<'static> = Value::from(v);
    if let Value::Str(s) = &value {
        util::validate_no_control(name, s.as_str())
            .map_err(|e| Error::build("append to properties", e))?;
    }
    let value = OwnedValue::try_from(value)
        .map_err(|e| Error::build("append to properties", format!("{name}: {e}")))?;
    props.push((name.to_string(), value));
    Ok(())
}
