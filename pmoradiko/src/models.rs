//! Data models for the radiko schedule and program metadata
//!
//! The schedule endpoint returns one XML document per region:
//!
//! ```xml
//! <radiko>
//!   <stations>
//!     <station id="TBS">
//!       <name>TBS RADIO</name>
//!       <scd>
//!         <progs>
//!           <date>20240101</date>
//!           <prog ft="20240101120000" to="20240101130000" ftl="1200" tol="1300" dur="3600">
//!             <title>...</title><subtitle/><pfm>...</pfm><desc/><info/><url/>
//!           </prog>
//!         </progs>
//!       </scd>
//!     </station>
//!   </stations>
//! </radiko>
//! ```
//!
//! A [`Program`] is also the metadata sidecar persisted next to each saved
//! recording, serialized as an indented `<prog>` element.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used by the schedule (`ft` / `to` attributes), local time
pub const RADIKO_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Root element name of the metadata sidecar
pub const PROGRAM_ELEMENT: &str = "prog";

// ============================================================================
// Schedule document
// ============================================================================

/// One day of programs for every station visible in a region
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub stations: Stations,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stations {
    #[serde(rename = "station", default)]
    pub list: Vec<StationSchedule>,
}

/// A station and its programs for the day
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StationSchedule {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scd: StationDay,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StationDay {
    #[serde(default)]
    pub progs: Programs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Programs {
    #[serde(default, alias = "@date")]
    pub date: String,
    #[serde(rename = "prog", default)]
    pub list: Vec<Program>,
}

impl Schedule {
    /// Parse a schedule document
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Ids of every station in the document, in document order
    pub fn station_ids(&self) -> Vec<String> {
        self.stations.list.iter().map(|s| s.id.clone()).collect()
    }

    /// Resolve the program airing on `station` at `now`.
    ///
    /// Programs are scanned in document order; the first one whose
    /// `[ft, to)` interval contains `now` wins. A timestamp that does not
    /// parse aborts the lookup.
    pub fn current_program(&self, station: &str, now: NaiveDateTime) -> Result<Program> {
        for schedule in self.stations.list.iter().filter(|s| s.id == station) {
            for program in &schedule.scd.progs.list {
                if program.is_airing(now)? {
                    return Ok(program.clone());
                }
            }
        }

        Err(Error::NotFound(format!(
            "no program airing on {} at {}",
            station,
            now.format(RADIKO_TIME_FORMAT)
        )))
    }
}

// ============================================================================
// Program
// ============================================================================

/// A single program of the schedule
///
/// Identity is `(ft, station)`; the station is carried by the capture that
/// recorded it, not by the program itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Program {
    /// Start, `YYYYMMDDHHMMSS` local time
    #[serde(rename = "@ft")]
    pub ft: String,
    /// End (exclusive), `YYYYMMDDHHMMSS` local time
    #[serde(rename = "@to")]
    pub to: String,
    /// Start as `HHMM`
    #[serde(rename = "@ftl")]
    pub ftl: String,
    /// End as `HHMM`
    #[serde(rename = "@tol")]
    pub tol: String,
    /// Scheduled duration in seconds
    #[serde(rename = "@dur")]
    pub dur: String,
    pub title: String,
    pub subtitle: String,
    /// Performers
    pub pfm: String,
    pub desc: String,
    pub info: String,
    pub url: String,
}

impl Program {
    pub fn start_time(&self) -> Result<NaiveDateTime> {
        parse_radiko_time(&self.ft)
    }

    pub fn end_time(&self) -> Result<NaiveDateTime> {
        parse_radiko_time(&self.to)
    }

    /// `ft <= now < to`
    pub fn is_airing(&self, now: NaiveDateTime) -> Result<bool> {
        Ok(self.start_time()? <= now && now < self.end_time()?)
    }

    /// Seconds left until the program ends (negative once it has ended)
    pub fn remaining_secs(&self, now: NaiveDateTime) -> Result<i64> {
        Ok((self.end_time()? - now).num_seconds())
    }

    /// Title used for the audio file tags: `"<title> (<start>)"`
    pub fn display_title(&self) -> Result<String> {
        let start = self.start_time()?;
        Ok(format!("{} ({})", self.title, start.format("%Y-%m-%d %H:%M:%S")))
    }

    /// Serialize as the metadata sidecar (`<prog>` root, 4-space indent)
    pub fn to_metadata_xml(&self) -> Result<String> {
        let mut buffer = String::new();
        let mut serializer =
            quick_xml::se::Serializer::with_root(&mut buffer, Some(PROGRAM_ELEMENT))?;
        serializer.indent(' ', 4);
        self.serialize(serializer)?;
        Ok(buffer)
    }

    /// Parse a metadata sidecar written by [`Program::to_metadata_xml`]
    pub fn from_metadata_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }
}

/// Parse a `YYYYMMDDHHMMSS` schedule timestamp
pub fn parse_radiko_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, RADIKO_TIME_FORMAT)
        .map_err(|e| Error::protocol(format!("invalid schedule timestamp {:?}: {}", value, e)))
}
