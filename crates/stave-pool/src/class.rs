//! The closed set of node classes a document can contain.
//!
//! Every class is a variant of [`NodeClass`]; its schema is a static table.
//! Persisted documents name classes by [`NodeClass::name`] and decode them
//! through [`NodeClass::from_name`], which scans the compile-time
//! [`NodeClass::ALL`] table.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use stave_types::{ScalarType, Value, Wrapped, WrappedType};

use crate::field::{FieldSet, FieldValue};
use crate::schema::{ClassSchema, FieldKind, FieldSpec};

/// Concrete node class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeClass {
    /// Document root.
    Project,
    /// Authoring metadata owned by the project.
    Metadata,
    Track,
    Measure,
    Note,
    /// One automation point on a track.
    ControlPoint,
}

impl NodeClass {
    pub const ALL: [NodeClass; 6] = [
        Self::Project,
        Self::Metadata,
        Self::Track,
        Self::Measure,
        Self::Note,
        Self::ControlPoint,
    ];

    /// Stable persisted name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::Metadata => "Metadata",
            Self::Track => "Track",
            Self::Measure => "Measure",
            Self::Note => "Note",
            Self::ControlPoint => "ControlPoint",
        }
    }

    /// Decode a persisted class name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Static schema of this class.
    pub fn schema(&self) -> &'static ClassSchema {
        match self {
            Self::Project => &PROJECT,
            Self::Metadata => &METADATA,
            Self::Track => &TRACK,
            Self::Measure => &MEASURE,
            Self::Note => &NOTE,
            Self::ControlPoint => &CONTROL_POINT,
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for NodeClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for NodeClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown node class {name:?}")))
    }
}

/// Musical meter stored as a wrapped value on each measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub upper: u8,
    pub lower: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature { upper: 4, lower: 4 };

    /// Returns `true` if the lower value is a power of two and both are non-zero.
    pub fn is_valid(&self) -> bool {
        self.upper > 0 && self.lower > 0 && self.lower.is_power_of_two()
    }
}

impl WrappedType for TimeSignature {
    const TYPE_NAME: &'static str = "TimeSignature";
}

fn text(s: &'static str) -> FieldValue {
    FieldValue::Scalar(Value::Text(s.to_string()))
}

static PROJECT_FIELDS: [FieldSpec; 5] = [
    FieldSpec::new("name", FieldKind::Scalar(ScalarType::Text)).with_default(|| text("Untitled")),
    FieldSpec::new("bpm", FieldKind::Scalar(ScalarType::Float))
        .with_default(|| FieldValue::Scalar(Value::Float(120.0))),
    FieldSpec::new("metadata", FieldKind::Child(NodeClass::Metadata)),
    FieldSpec::new("tracks", FieldKind::ChildList(NodeClass::Track)),
    FieldSpec::new("selection", FieldKind::RefList),
];

static METADATA_FIELDS: [FieldSpec; 3] = [
    FieldSpec::new("author", FieldKind::Scalar(ScalarType::Text)).with_default(|| text("")),
    FieldSpec::new("license", FieldKind::Scalar(ScalarType::Text)).with_default(|| text("")),
    FieldSpec::new("tags", FieldKind::ScalarList(ScalarType::Text)),
];

static TRACK_FIELDS: [FieldSpec; 6] = [
    FieldSpec::new("name", FieldKind::Scalar(ScalarType::Text)),
    FieldSpec::new("muted", FieldKind::Scalar(ScalarType::Bool))
        .with_default(|| FieldValue::Scalar(Value::Bool(false))),
    FieldSpec::new("volume", FieldKind::Scalar(ScalarType::Float))
        .with_default(|| FieldValue::Scalar(Value::Float(1.0))),
    FieldSpec::new("output", FieldKind::Ref),
    FieldSpec::new("measures", FieldKind::ChildList(NodeClass::Measure)),
    FieldSpec::new("automation", FieldKind::ChildList(NodeClass::ControlPoint)),
];

static MEASURE_FIELDS: [FieldSpec; 2] = [
    FieldSpec::new("time_signature", FieldKind::Wrapped(TimeSignature::TYPE_NAME))
        .with_default(common_time),
    FieldSpec::new("notes", FieldKind::ChildList(NodeClass::Note)),
];

static NOTE_FIELDS: [FieldSpec; 4] = [
    FieldSpec::new("pitch", FieldKind::Scalar(ScalarType::Int)),
    FieldSpec::new("start", FieldKind::Scalar(ScalarType::Int))
        .with_default(|| FieldValue::Scalar(Value::Int(0))),
    FieldSpec::new("duration", FieldKind::Scalar(ScalarType::Int))
        .with_default(|| FieldValue::Scalar(Value::Int(480))),
    FieldSpec::new("velocity", FieldKind::Scalar(ScalarType::Int))
        .with_default(|| FieldValue::Scalar(Value::Int(100))),
];

static CONTROL_POINT_FIELDS: [FieldSpec; 2] = [
    FieldSpec::new("time", FieldKind::Scalar(ScalarType::Int)),
    FieldSpec::new("value", FieldKind::Scalar(ScalarType::Float)),
];

static PROJECT: ClassSchema = ClassSchema {
    class: NodeClass::Project,
    fields: &PROJECT_FIELDS,
    init: None,
};

static METADATA: ClassSchema = ClassSchema {
    class: NodeClass::Metadata,
    fields: &METADATA_FIELDS,
    init: None,
};

static TRACK: ClassSchema = ClassSchema {
    class: NodeClass::Track,
    fields: &TRACK_FIELDS,
    init: None,
};

static MEASURE: ClassSchema = ClassSchema {
    class: NodeClass::Measure,
    fields: &MEASURE_FIELDS,
    init: None,
};

static NOTE: ClassSchema = ClassSchema {
    class: NodeClass::Note,
    fields: &NOTE_FIELDS,
    init: Some(clamp_velocity),
};

static CONTROL_POINT: ClassSchema = ClassSchema {
    class: NodeClass::ControlPoint,
    fields: &CONTROL_POINT_FIELDS,
    init: None,
};

fn common_time() -> FieldValue {
    // bincode writes each u8 field as one byte.
    let TimeSignature { upper, lower } = TimeSignature::COMMON;
    FieldValue::Wrapped(Wrapped::from_raw(TimeSignature::TYPE_NAME, vec![upper, lower]))
}

/// MIDI velocity range.
fn clamp_velocity(fields: &mut FieldSet) {
    const VELOCITY: usize = 3;
    if let Some(FieldValue::Scalar(Value::Int(v))) = fields.get_mut(VELOCITY) {
        *v = (*v).clamp(0, 127);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip_through_table() {
        for class in NodeClass::ALL {
            assert_eq!(NodeClass::from_name(class.name()), Some(class));
            assert_eq!(class.schema().class, class);
        }
        assert_eq!(NodeClass::from_name("Synth"), None);
    }

    #[test]
    fn serde_uses_stable_names() {
        let bytes = bincode::serialize(&NodeClass::Measure).unwrap();
        let back: NodeClass = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, NodeClass::Measure);

        let bogus = bincode::serialize("Synth").unwrap();
        assert!(bincode::deserialize::<NodeClass>(&bogus).is_err());
    }

    #[test]
    fn note_velocity_index_matches_schema() {
        let (idx, _) = NodeClass::Note.schema().field("velocity").unwrap();
        assert_eq!(idx, 3);
    }

    #[test]
    fn measure_defaults_to_common_time() {
        let fields = MEASURE.build(&Default::default()).unwrap();
        match fields.get(0) {
            Some(FieldValue::Wrapped(w)) => {
                assert_eq!(w.decode::<TimeSignature>().unwrap(), TimeSignature::COMMON)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn time_signature_validity() {
        assert!(TimeSignature { upper: 7, lower: 8 }.is_valid());
        assert!(!TimeSignature { upper: 3, lower: 3 }.is_valid());
        assert!(!TimeSignature { upper: 0, lower: 4 }.is_valid());
    }
}
