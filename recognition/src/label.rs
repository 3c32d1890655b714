use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use sv_core::Error;
use sv_registration::{FlipAxis, OrientationPolicy};

/// Every object class the perception front end knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectLabel {
    IceTea,
    Milk,
    Cereal,
    Pringles,
    Ketchup,
    TomatoSauce,
    Rice,
    Cup,
    Bowl,
    Bottle,
}

impl ObjectLabel {
    pub const ALL: [ObjectLabel; 10] = [
        ObjectLabel::IceTea,
        ObjectLabel::Milk,
        ObjectLabel::Cereal,
        ObjectLabel::Pringles,
        ObjectLabel::Ketchup,
        ObjectLabel::TomatoSauce,
        ObjectLabel::Rice,
        ObjectLabel::Cup,
        ObjectLabel::Bowl,
        ObjectLabel::Bottle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectLabel::IceTea => "ice_tea",
            ObjectLabel::Milk => "milk",
            ObjectLabel::Cereal => "cereal",
            ObjectLabel::Pringles => "pringles",
            ObjectLabel::Ketchup => "ketchup",
            ObjectLabel::TomatoSauce => "tomato_sauce",
            ObjectLabel::Rice => "rice",
            ObjectLabel::Cup => "cup",
            ObjectLabel::Bowl => "bowl",
            ObjectLabel::Bottle => "bottle",
        }
    }

    /// How the aligned rotation of this class is post-processed.
    pub fn orientation_policy(&self) -> OrientationPolicy {
        match self {
            ObjectLabel::Bowl => OrientationPolicy::Identity,
            ObjectLabel::IceTea
            | ObjectLabel::Milk
            | ObjectLabel::Cereal
            | ObjectLabel::Pringles
            | ObjectLabel::Ketchup
            | ObjectLabel::TomatoSauce
            | ObjectLabel::Rice
            | ObjectLabel::Cup
            | ObjectLabel::Bottle => OrientationPolicy::UprightCorrection { axis: FlipAxis::X },
        }
    }
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ObjectLabel::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == wanted)
            .ok_or_else(|| Error::CatalogMiss(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for label in ObjectLabel::ALL {
            assert_eq!(label.as_str().parse::<ObjectLabel>().unwrap(), label);
        }
        assert_eq!("Ice_Tea".parse::<ObjectLabel>().unwrap(), ObjectLabel::IceTea);
    }

    #[test]
    fn test_unknown_label_is_catalog_miss() {
        let err = "mug".parse::<ObjectLabel>().unwrap_err();
        assert!(matches!(err, Error::CatalogMiss(ref s) if s == "mug"));
    }

    #[test]
    fn test_policy_per_class() {
        assert_eq!(ObjectLabel::Bowl.orientation_policy(), OrientationPolicy::Identity);
        assert_eq!(
            ObjectLabel::Milk.orientation_policy(),
            OrientationPolicy::UprightCorrection { axis: FlipAxis::X }
        );
    }
}
