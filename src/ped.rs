//! Parsing of PLINK PED files and resolution of the individuals of a case.
//!
//! PED files are TSV files with the following entries
//!
//! 1. Family name (string)
//! 2. Individual name (string)
//! 3. Paternal ID (string)
//! 4. Maternal ID (string)
//! 5. Sex (integer; M/1=male; F/2=female; other=unknown)
//! 6. Affected (integer; 1=unaffected; 2=affected; other=unknown)
//!
//! Additional columns are ignored.

use std::{fmt::Display, path::Path, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::CaseError;

/// Format of the family file.
///
/// Only PED files are read; the other formats are recognized so that they can
/// be rejected explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FamilyType {
    #[default]
    Ped,
    Alt,
    Cmms,
    Mip,
}

/// Encode the sex of an individual in a PED file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unknown,
}

impl FromStr for Sex {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "m" | "M" => Ok(Sex::Male),
            "2" | "f" | "F" => Ok(Sex::Female),
            _ => Ok(Sex::Unknown),
        }
    }
}

impl Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sex::Male => write!(f, "1"),
            Sex::Female => write!(f, "2"),
            Sex::Unknown => write!(f, "0"),
        }
    }
}

/// Encode the disease status of an individual in a PED file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disease {
    Affected,
    Unaffected,
    #[default]
    Unknown,
}

impl FromStr for Disease {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Disease::Unaffected),
            "2" => Ok(Disease::Affected),
            _ => Ok(Disease::Unknown),
        }
    }
}

impl Display for Disease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disease::Unaffected => write!(f, "1"),
            Disease::Affected => write!(f, "2"),
            Disease::Unknown => write!(f, "0"),
        }
    }
}

/// Encode an individual in a PED file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Individual {
    /// Family of the individual.
    pub family: String,
    /// Individual's ID.
    pub name: String,
    /// ID of the individual's father, `"0"` for founder.
    #[serde(with = "string_option")]
    pub father: Option<String>,
    /// ID of the individual's mother, `"0"` for founder.
    #[serde(with = "string_option")]
    pub mother: Option<String>,
    /// Sex of the individual.
    #[serde(with = "string")]
    pub sex: Sex,
    /// Disease of the individual.
    #[serde(with = "string")]
    pub disease: Disease,
}

impl Individual {
    /// Individual known only by its sample name, as used without a PED file.
    pub fn from_sample(family: &str, name: &str) -> Self {
        Self {
            family: family.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn from_record(record: &csv::StringRecord) -> Result<Self, anyhow::Error> {
        if record.len() < 6 {
            anyhow::bail!(
                "PED line {:?} has {} columns, expected at least 6",
                record.iter().join("\t"),
                record.len()
            );
        }
        let parent = |s: &str| (s != "0" && !s.is_empty()).then(|| s.to_string());
        Ok(Self {
            family: record[0].to_string(),
            name: record[1].to_string(),
            father: parent(&record[2]),
            mother: parent(&record[3]),
            sex: record[4].parse()?,
            disease: record[5].parse()?,
        })
    }
}

/// Individuals in a PED file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pedigree {
    pub individuals: Vec<Individual>,
}

impl Pedigree {
    /// Load `Pedigree` from the given path.
    pub fn from_path<P>(path: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut individuals = Vec::new();
        for result in rdr.records() {
            let record = result?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            individuals.push(Individual::from_record(&record)?);
        }
        Ok(Pedigree { individuals })
    }

    /// Load `Pedigree` from the family file at `path` of the given format.
    pub fn from_path_with_type<P>(path: P, family_type: FamilyType) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        if family_type != FamilyType::Ped {
            return Err(CaseError::UnsupportedFamilyType(family_type.to_string()).into());
        }
        Self::from_path(path)
    }

    /// Distinct family names, in order of appearance.
    pub fn families(&self) -> Vec<String> {
        self.individuals
            .iter()
            .map(|individual| individual.family.clone())
            .unique()
            .collect()
    }
}

/// The individuals whose genotype calls are inspected for a case.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedCase {
    pub case_id: String,
    pub individuals: Vec<Individual>,
}

impl ResolvedCase {
    pub fn sample_names(&self) -> Vec<&str> {
        self.individuals
            .iter()
            .map(|individual| individual.name.as_str())
            .collect()
    }
}

/// Check that `case_id` can key registry entries: non-empty and without NUL bytes.
pub fn validate_case_id(case_id: &str) -> Result<(), CaseError> {
    if case_id.is_empty() || case_id.contains('\0') {
        return Err(CaseError::InvalidCaseId(case_id.to_string()));
    }
    Ok(())
}

/// Resolve the individuals of a case.
///
/// With a pedigree, its single family is used and every individual must be
/// present among `samples`; the explicit `case_id` overrides the family name.
/// Without a pedigree all `samples` are used and `case_id` is mandatory.
pub fn resolve(
    pedigree: Option<&Pedigree>,
    case_id: Option<&str>,
    samples: &[String],
) -> Result<ResolvedCase, CaseError> {
    let Some(pedigree) = pedigree else {
        let case_id = case_id.ok_or(CaseError::MissingCaseId)?;
        validate_case_id(case_id)?;
        if samples.is_empty() {
            return Err(CaseError::NoSamples(case_id.to_string()));
        }
        return Ok(ResolvedCase {
            case_id: case_id.to_string(),
            individuals: samples
                .iter()
                .map(|sample| Individual::from_sample(case_id, sample))
                .collect(),
        });
    };

    if pedigree.individuals.is_empty() {
        return Err(CaseError::EmptyPedigree);
    }
    let families = pedigree.families();
    if families.len() > 1 {
        return Err(CaseError::MultipleFamilies(families));
    }
    let unknown = pedigree
        .individuals
        .iter()
        .filter(|individual| !samples.contains(&individual.name))
        .map(|individual| individual.name.clone())
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        return Err(CaseError::UnknownSamples(unknown));
    }

    let case_id = case_id
        .map(str::to_string)
        .unwrap_or_else(|| families[0].clone());
    validate_case_id(&case_id)?;
    Ok(ResolvedCase {
        case_id,
        individuals: pedigree.individuals.clone(),
    })
}

/// Helper for serialize using Display/FromStr.
///
/// cf. https://github.com/serde-rs/serde/issues/1316#issue-332908452
mod string {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// Helper for serializing `Option<String>` where `"0"` encodes `None`.
///
/// cf. https://github.com/serde-rs/serde/issues/1316#issue-332908452
mod string_option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(s) => serializer.collect_str(s),
            None => serializer.collect_str("0"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "0" {
            Ok(None)
        } else {
            Ok(Some(s))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn samples(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sex_from_str() -> Result<(), anyhow::Error> {
        assert_eq!(Sex::from_str("0")?, Sex::Unknown);
        assert_eq!(Sex::from_str("1")?, Sex::Male);
        assert_eq!(Sex::from_str("F")?, Sex::Female);

        Ok(())
    }

    #[test]
    fn disease_from_str() -> Result<(), anyhow::Error> {
        assert_eq!(Disease::from_str("-9")?, Disease::Unknown);
        assert_eq!(Disease::from_str("1")?, Disease::Unaffected);
        assert_eq!(Disease::from_str("2")?, Disease::Affected);

        Ok(())
    }

    #[test]
    fn pedigree_from_path() -> Result<(), anyhow::Error> {
        let pedigree = Pedigree::from_path("tests/data/ped/trio1.ped")?;
        assert_eq!(pedigree.individuals.len(), 3);
        assert_eq!(pedigree.families(), vec![String::from("trio1")]);
        assert_eq!(
            pedigree.individuals[0],
            Individual {
                family: String::from("trio1"),
                name: String::from("child"),
                father: Some(String::from("father")),
                mother: Some(String::from("mother")),
                sex: Sex::Male,
                disease: Disease::Affected,
            }
        );

        Ok(())
    }

    #[test]
    fn pedigree_from_path_too_few_columns() {
        assert!(Pedigree::from_path("tests/data/ped/broken.ped").is_err());
    }

    #[rstest::rstest]
    #[case(FamilyType::Ped, true)]
    #[case(FamilyType::Alt, false)]
    #[case(FamilyType::Cmms, false)]
    #[case(FamilyType::Mip, false)]
    fn pedigree_family_types(#[case] family_type: FamilyType, #[case] supported: bool) {
        let result = Pedigree::from_path_with_type("tests/data/ped/trio1.ped", family_type);
        assert_eq!(result.is_ok(), supported);
        if let Err(e) = result {
            assert_eq!(
                e.downcast_ref::<CaseError>(),
                Some(&CaseError::UnsupportedFamilyType(family_type.to_string()))
            );
        }
    }

    #[test]
    fn individual_serde_json() -> Result<(), anyhow::Error> {
        let individual = Individual::from_sample("case", "S1");
        let json = serde_json::to_string(&individual)?;
        assert_eq!(
            json,
            r#"{"family":"case","name":"S1","father":"0","mother":"0","sex":"0","disease":"0"}"#
        );
        assert_eq!(serde_json::from_str::<Individual>(&json)?, individual);

        Ok(())
    }

    #[test]
    fn resolve_with_pedigree() -> Result<(), anyhow::Error> {
        let pedigree = Pedigree::from_path("tests/data/ped/trio1.ped")?;
        let case = resolve(
            Some(&pedigree),
            None,
            &samples(&["father", "mother", "child", "unrelated"]),
        )?;
        assert_eq!(case.case_id, "trio1");
        assert_eq!(case.sample_names(), vec!["child", "mother", "father"]);

        let case = resolve(
            Some(&pedigree),
            Some("override"),
            &samples(&["father", "mother", "child"]),
        )?;
        assert_eq!(case.case_id, "override");

        Ok(())
    }

    #[test]
    fn resolve_unknown_sample() -> Result<(), anyhow::Error> {
        let mut pedigree = Pedigree::from_path("tests/data/ped/trio1.ped")?;
        pedigree
            .individuals
            .push(Individual::from_sample("trio1", "S99"));
        assert_eq!(
            resolve(
                Some(&pedigree),
                None,
                &samples(&["child", "mother", "father"])
            ),
            Err(CaseError::UnknownSamples(vec![String::from("S99")]))
        );

        Ok(())
    }

    #[test]
    fn resolve_empty_and_multiple_families() {
        assert_eq!(
            resolve(Some(&Pedigree::default()), Some("case"), &samples(&["S1"])),
            Err(CaseError::EmptyPedigree)
        );
        let pedigree = Pedigree {
            individuals: vec![
                Individual::from_sample("fam1", "S1"),
                Individual::from_sample("fam2", "S2"),
            ],
        };
        assert_eq!(
            resolve(Some(&pedigree), None, &samples(&["S1", "S2"])),
            Err(CaseError::MultipleFamilies(vec![
                String::from("fam1"),
                String::from("fam2")
            ]))
        );
    }

    #[test]
    fn resolve_without_pedigree() {
        assert_eq!(
            resolve(None, None, &samples(&["S1"])),
            Err(CaseError::MissingCaseId)
        );
        assert_eq!(
            resolve(None, Some("case"), &[]),
            Err(CaseError::NoSamples(String::from("case")))
        );
        assert_eq!(
            resolve(None, Some("case"), &samples(&["S1", "S2"])),
            Ok(ResolvedCase {
                case_id: String::from("case"),
                individuals: vec![
                    Individual::from_sample("case", "S1"),
                    Individual::from_sample("case", "S2"),
                ],
            })
        );
    }

    #[rstest::rstest]
    #[case("")]
    #[case("a\0b")]
    #[case("\0")]
    fn resolve_rejects_invalid_case_id(#[case] case_id: &str) -> Result<(), anyhow::Error> {
        let expected = Err(CaseError::InvalidCaseId(case_id.to_string()));
        assert_eq!(resolve(None, Some(case_id), &samples(&["S1"])), expected);

        let pedigree = Pedigree::from_path("tests/data/ped/trio1.ped")?;
        let header = samples(&["child", "mother", "father"]);
        assert_eq!(resolve(Some(&pedigree), Some(case_id), &header), expected);

        Ok(())
    }

    #[test]
    fn resolved_case_yaml() -> Result<(), anyhow::Error> {
        let pedigree = Pedigree::from_path("tests/data/ped/trio1.ped")?;
        let case = resolve(
            Some(&pedigree),
            None,
            &samples(&["child", "mother", "father"]),
        )?;

        insta::assert_yaml_snapshot!(case, @r#"
        case_id: trio1
        individuals:
          - family: trio1
            name: child
            father: father
            mother: mother
            sex: "1"
            disease: "2"
          - family: trio1
            name: mother
            father: "0"
            mother: "0"
            sex: "2"
            disease: "1"
          - family: trio1
            name: father
            father: "0"
            mother: "0"
            sex: "1"
            disease: "1"
        "#);

        Ok(())
    }
}
