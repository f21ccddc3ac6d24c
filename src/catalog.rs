//! Built-in record kinds.
//!
//! The definitions live in `schemas/nnsa_kb_core.yml` and are compiled into
//! the binary. Each kind also gets a module of [`FieldId`] constants so code
//! that knows the kind statically can skip name lookups.

use std::{collections::BTreeMap, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::schema::{Schema, SchemaDef};

const CORE_YAML: &str = include_str!("../schemas/nnsa_kb_core.yml");

static CATALOG: OnceLock<BTreeMap<String, Arc<Schema>>> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct CatalogFile {
    source: String,
    #[serde(default)]
    na_marker: Option<String>,
    kinds: Vec<SchemaDef>,
}

fn parse_catalog(yaml: &str) -> Result<BTreeMap<String, Arc<Schema>>> {
    let file: CatalogFile = serde_yaml::from_str(yaml).context("Parsing built-in schema catalog")?;
    let mut schemas = BTreeMap::new();
    for mut def in file.kinds {
        def.source.get_or_insert_with(|| file.source.clone());
        if def.na_marker.is_none() {
            def.na_marker = file.na_marker.clone();
        }
        let kind = def.kind.clone();
        let schema = Schema::from_def(def)
            .with_context(|| format!("Validating built-in schema '{kind}'"))?;
        schemas.insert(schema.kind().to_string(), schema.into_shared());
    }
    Ok(schemas)
}

fn catalog() -> Result<&'static BTreeMap<String, Arc<Schema>>> {
    if let Some(schemas) = CATALOG.get() {
        return Ok(schemas);
    }
    let parsed = parse_catalog(CORE_YAML)?;
    Ok(CATALOG.get_or_init(|| parsed))
}

/// Names of the built-in kinds, sorted.
pub fn kinds() -> Result<Vec<&'static str>> {
    Ok(catalog()?.keys().map(String::as_str).collect())
}

pub fn schema(kind: &str) -> Result<Arc<Schema>> {
    let wanted = kind.trim().to_ascii_lowercase();
    let schemas = catalog()?;
    schemas.get(&wanted).cloned().ok_or_else(|| {
        anyhow!(
            "Unknown record kind '{kind}'. Built-in kinds: {}",
            schemas.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        )
    })
}

macro_rules! field_tags {
    ($(#[$meta:meta])* $kind:ident { $($tag:ident = $index:literal),+ $(,)? }) => {
        $(#[$meta])*
        pub mod $kind {
            use crate::field::FieldId;

            pub const KIND: &str = stringify!($kind);
            $(pub const $tag: FieldId = FieldId::new($index);)+

            #[cfg(test)]
            pub(crate) const TAGS: &[(&str, FieldId)] = &[$((stringify!($tag), $tag)),+];
        }
    };
}

field_tags!(
    /// Geographic region names.
    gregion { GRN = 0, GRNAME = 1 }
);

field_tags!(
    /// Network magnitudes.
    netmag {
        MAGID = 0,
        NET = 1,
        ORID = 2,
        EVID = 3,
        MAGTYPE = 4,
        NSTA = 5,
        MAGNITUDE = 6,
        UNCERTAINTY = 7,
        AUTH = 8,
        COMMID = 9,
    }
);

field_tags!(
    /// Waveform tags.
    wftag { TAGNAME = 0, TAGID = 1, WFID = 2 }
);

field_tags!(
    /// Station locations.
    site {
        STA = 0,
        ONDATE = 1,
        OFFDATE = 2,
        LAT = 3,
        LON = 4,
        ELEV = 5,
        STANAME = 6,
        STATYPE = 7,
        REFSTA = 8,
        DNORTH = 9,
        DEAST = 10,
    }
);

field_tags!(
    /// Station magnitudes.
    stamag {
        MAGID = 0,
        AMPID = 1,
        STA = 2,
        ARID = 3,
        ORID = 4,
        EVID = 5,
        PHASE = 6,
        DELTA = 7,
        MAGTYPE = 8,
        MAGNITUDE = 9,
        UNCERTAINTY = 10,
        MAGRES = 11,
        MAGDEF = 12,
        MMODEL = 13,
        AUTH = 14,
        COMMID = 15,
    }
);
