//! Post-hoc analysis of configured observation files.
//!
//! Each file yields one [`FieldSummary`] and one [`TargetRecord`] per target.
//! A batch keeps going when a file can't be parsed: the failure is logged
//! and the file left out of the aggregate.

pub mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::document::{Document, DocumentError, Target};

/// Fibres on each plate, used to estimate how many were left parked.
pub const PLATE_A_FIBRES: i64 = 964;
pub const PLATE_B_FIBRES: i64 = 948;

/// Survey reported for sky targets that `configure` picked itself.
pub const AUTOSKY: &str = "AUTOSKY";

/// Errors that exclude a file from analysis, or abort writing results.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("missing {attribute} on {element}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("{attribute} is not a number: {value:?}")]
    BadNumber {
        attribute: &'static str,
        value: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, AnalysisError>;

/// One target in one configured field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetRecord {
    pub field_name: String,
    pub progtemp: String,
    pub obstemp: String,
    pub targsrvy: String,
    pub targid: String,
    pub targra: Option<f64>,
    pub targdec: Option<f64>,
    pub targuse: String,
    pub targclass: String,
    pub targprog: String,
    pub targx: Option<f64>,
    pub targy: Option<f64>,
    pub fibreid: Option<f64>,
    pub configid: Option<f64>,
    /// `-1` when the file gives none.
    pub targprio: f64,
    pub assigned: bool,
}

/// Key facts about one configured field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSummary {
    pub field_name: String,
    pub ra: f64,
    pub dec: f64,
    pub plate: Option<String>,
    /// Hour-angle window in which the configuration is valid.
    pub hr_min: Option<f64>,
    pub hr_max: Option<f64>,
    pub assigned: usize,
    pub parked: Option<i64>,
    pub progtemp: String,
    pub obstemp: String,
    pub max_sky: Option<String>,
    pub max_calibration: Option<String>,
    pub max_guide: Option<String>,
    pub assigned_by_survey: BTreeMap<String, usize>,
    pub max_fibres: BTreeMap<String, String>,
}

/// Results of parsing many files.
#[derive(Debug, Default)]
pub struct Batch {
    pub summaries: Vec<FieldSummary>,
    pub targets: Vec<TargetRecord>,
    pub failed: Vec<PathBuf>,
}

/// Parses every file; unreadable ones are logged and listed in `failed`.
pub fn parse_batch(files: &[PathBuf]) -> Batch {
    let mut batch = Batch::default();
    for file in files {
        match parse_file(file) {
            Ok((summary, targets)) => {
                batch.summaries.push(summary);
                batch.targets.extend(targets);
            }
            Err(e) => {
                warn!(file = %file.display(), "problem reading file: {e}");
                batch.failed.push(file.clone());
            }
        }
    }
    info!(
        parsed = batch.summaries.len(),
        failed = batch.failed.len(),
        targets = batch.targets.len(),
        "parsed configured files"
    );
    batch
}

/// Parses one file into its summary and target records.
pub fn parse_file(path: &Path) -> Result<(FieldSummary, Vec<TargetRecord>)> {
    let doc = Document::read(path)?;
    let targets = target_records(&doc)?;
    let summary = field_summary(&doc, &targets)?;
    Ok((summary, targets))
}

/// One record per target in `doc`.
pub fn target_records(doc: &Document) -> Result<Vec<TargetRecord>> {
    let observation = doc.observation()?;
    let field_name = observation.attr("name").unwrap_or_default();
    let progtemp = observation.attr("progtemp").unwrap_or_default();
    let obstemp = observation.attr("obstemp").unwrap_or_default();

    Ok(doc
        .targets()
        .iter()
        .map(|t| target_record(t, field_name, progtemp, obstemp))
        .collect())
}

fn target_record(t: &Target<'_>, field_name: &str, progtemp: &str, obstemp: &str) -> TargetRecord {
    let text = |key: &str| t.attr(key).unwrap_or_default().to_string();
    let use_class = t.use_class().unwrap_or_default().to_string();
    let survey = match t.survey() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ if use_class == "S" => AUTOSKY.to_string(),
        _ => String::new(),
    };
    let priority = t.priority();

    TargetRecord {
        field_name: field_name.to_string(),
        progtemp: progtemp.to_string(),
        obstemp: obstemp.to_string(),
        targsrvy: survey,
        targid: text("targid"),
        targra: t.number("targra"),
        targdec: t.number("targdec"),
        targuse: use_class,
        targclass: text("targclass"),
        targprog: text("targprog"),
        targx: t.number("targx"),
        targy: t.number("targy"),
        fibreid: t.number("fibreid"),
        configid: t.number("configid"),
        targprio: if priority.is_finite() { priority } else { -1.0 },
        assigned: t.is_assigned(),
    }
}

/// Summarizes `doc`, given its already-parsed target records.
pub fn field_summary(doc: &Document, targets: &[TargetRecord]) -> Result<FieldSummary> {
    let observation = doc.observation()?;
    let field = doc.field()?;
    let configure = observation.child("configure");
    let configure_attr = |key: &str| configure.and_then(|c| c.attr(key)).map(String::from);
    let limits = observation.find("configure/hour_angle_limits");
    let limit = |key: &'static str| -> Result<Option<f64>> {
        limits
            .and_then(|l| l.attr(key))
            .map(|v| number("hour_angle_limits", key, Some(v)))
            .transpose()
    };

    let mut assigned_by_survey = BTreeMap::new();
    for record in targets.iter().filter(|r| r.assigned) {
        *assigned_by_survey.entry(record.targsrvy.clone()).or_insert(0) += 1;
    }
    let assigned = assigned_by_survey.values().sum::<usize>();

    let plate = configure_attr("plate");
    let parked = plate.as_deref().and_then(|p| {
        let total = match p {
            "PLATE_A" => PLATE_A_FIBRES,
            "PLATE_B" => PLATE_B_FIBRES,
            _ => return None,
        };
        i64::try_from(assigned).ok().map(|a| total - a)
    });

    let max_fibres = doc
        .root()
        .descendants("survey")
        .into_iter()
        .filter_map(|s| Some((s.attr("name")?.to_string(), s.attr("max_fibres")?.to_string())))
        .collect();

    Ok(FieldSummary {
        field_name: observation.attr("name").unwrap_or_default().to_string(),
        ra: number("field", "RA_d", field.attr("RA_d"))?,
        dec: number("field", "Dec_d", field.attr("Dec_d"))?,
        plate,
        hr_min: limit("earliest")?,
        hr_max: limit("latest")?,
        assigned,
        parked,
        progtemp: observation.attr("progtemp").unwrap_or_default().to_string(),
        obstemp: observation.attr("obstemp").unwrap_or_default().to_string(),
        max_sky: configure_attr("max_sky"),
        max_calibration: configure_attr("max_calibration"),
        max_guide: configure_attr("max_guide"),
        assigned_by_survey,
        max_fibres,
    })
}

fn number(element: &'static str, attribute: &'static str, value: Option<&str>) -> Result<f64> {
    let value = value.ok_or(AnalysisError::MissingAttribute { element, attribute })?;
    value.trim().parse().map_err(|_| AnalysisError::BadNumber {
        attribute,
        value: value.to_string(),
    })
}

/// Writes summaries as CSV: fixed columns first, then `assigned_<SURVEY>` and
/// `max_<SURVEY>` for every survey seen in the batch.
pub fn write_summaries(path: &Path, summaries: &[FieldSummary]) -> Result<()> {
    let assigned_surveys: BTreeSet<&str> = summaries
        .iter()
        .flat_map(|s| s.assigned_by_survey.keys().map(String::as_str))
        .collect();
    let capped_surveys: BTreeSet<&str> = summaries
        .iter()
        .flat_map(|s| s.max_fibres.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = [
        "field_name",
        "ra",
        "dec",
        "plate",
        "hr_min",
        "hr_max",
        "assigned",
        "parked",
        "progtemp",
        "obstemp",
        "max_sky",
        "max_calibration",
        "max_guide",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    header.extend(assigned_surveys.iter().map(|s| format!("assigned_{s}")));
    header.extend(capped_surveys.iter().map(|s| format!("max_{s}")));
    writer.write_record(&header)?;

    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for s in summaries {
        let mut row = vec![
            s.field_name.clone(),
            s.ra.to_string(),
            s.dec.to_string(),
            s.plate.clone().unwrap_or_default(),
            opt(s.hr_min),
            opt(s.hr_max),
            s.assigned.to_string(),
            s.parked.map(|p| p.to_string()).unwrap_or_default(),
            s.progtemp.clone(),
            s.obstemp.clone(),
            s.max_sky.clone().unwrap_or_default(),
            s.max_calibration.clone().unwrap_or_default(),
            s.max_guide.clone().unwrap_or_default(),
        ];
        row.extend(assigned_surveys.iter().map(|survey| {
            s.assigned_by_survey
                .get(*survey)
                .copied()
                .unwrap_or(0)
                .to_string()
        }));
        row.extend(
            capped_surveys
                .iter()
                .map(|survey| s.max_fibres.get(*survey).cloned().unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one CSV row per target record.
pub fn write_targets(path: &Path, targets: &[TargetRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in targets {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
