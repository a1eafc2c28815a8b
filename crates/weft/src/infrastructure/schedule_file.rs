//! Schedule files
//!
//! # Format
//!
//! A sequence of records up to end of file, all integers little-endian:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────┬───────────┬────────────┐
//! │ source i32 │ target i32 │ label len   │ label     │ count i32  │
//! │            │            │ u32         │ UTF-8     │            │
//! └────────────┴────────────┴─────────────┴───────────┴────────────┘
//! ```
//!
//! A transfer stores its target id. A choice stores `-1 - value` as its
//! target and `choice:<arity>` as its label. Bare yields and backtrack
//! points are not written.
//!
//! Loaded points carry thread ids that are only placeholders until the
//! replaying run meets them; see `ScenarioState::resolve`.

use crate::domain::error::EngineError;
use crate::domain::schedule::{ChoicePoint, Schedule, SchedulePoint, TransferPoint, YieldPoint};
use crate::domain::types::ThreadId;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::info;

const CHOICE_PREFIX: &str = "choice:";

fn io_error(path: &Path, e: &std::io::Error) -> EngineError {
    EngineError::ScheduleFile(format!("{}: {e}", path.display()))
}

fn to_i32(value: usize, what: &str) -> Result<i32, EngineError> {
    i32::try_from(value).map_err(|_| EngineError::ScheduleFile(format!("{what} {value} does not fit a record")))
}

/// One record of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    source: i32,
    target: i32,
    label: String,
    count: i32,
}

impl Record {
    fn from_point(point: &SchedulePoint) -> Result<Option<Self>, EngineError> {
        match point {
            SchedulePoint::Transfer(t) => {
                let Some(target) = t.target else {
                    return Ok(None);
                };
                Ok(Some(Self {
                    source: to_i32(t.at.source.as_usize(), "thread id")?,
                    target: to_i32(target.as_usize(), "thread id")?,
                    label: t.at.label.clone(),
                    count: i32::try_from(t.at.count).unwrap_or(i32::MAX),
                }))
            }
            SchedulePoint::Choice(c) => Ok(Some(Self {
                source: to_i32(c.source.as_usize(), "thread id")?,
                target: -1 - i32::try_from(c.value).unwrap_or(i32::MAX - 1),
                label: format!("{CHOICE_PREFIX}{}", c.arity),
                count: 1,
            })),
            SchedulePoint::Yield(_) => Ok(None),
        }
    }

    fn into_point(self) -> Result<SchedulePoint, EngineError> {
        let source = usize::try_from(self.source)
            .map(ThreadId::new)
            .map_err(|_| EngineError::ScheduleFile(format!("negative source {}", self.source)))?;

        if self.target < 0 {
            let arity = self
                .label
                .strip_prefix(CHOICE_PREFIX)
                .and_then(|a| a.parse::<u32>().ok())
                .ok_or_else(|| EngineError::ScheduleFile(format!("malformed choice label {:?}", self.label)))?;
            let value = u32::try_from(-1 - self.target).unwrap_or(u32::MAX);
            if value >= arity {
                return Err(EngineError::ScheduleFile(format!("choice value {value} out of arity {arity}")));
            }
            let mut choice = ChoicePoint::new(source, arity);
            choice.value = value;
            return Ok(SchedulePoint::Choice(choice));
        }

        let count = u32::try_from(self.count)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| EngineError::ScheduleFile(format!("count {} must be positive", self.count)))?;
        let mut at = YieldPoint::new(source, self.label, None, None);
        at.count = count;
        at.resolved = false;
        let target = usize::try_from(self.target).map(ThreadId::new).ok();
        let mut transfer = TransferPoint::new(at, target);
        transfer.target_resolved = false;
        Ok(SchedulePoint::Transfer(transfer))
    }

    fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        let len = u32::try_from(self.label.len())
            .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "label too long"))?;
        out.write_all(&self.source.to_le_bytes())?;
        out.write_all(&self.target.to_le_bytes())?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(self.label.as_bytes())?;
        out.write_all(&self.count.to_le_bytes())
    }

    /// `None` at a clean end of file.
    fn read_from(input: &mut impl Read) -> std::io::Result<Option<Self>> {
        let mut word = [0u8; 4];
        match input.read_exact(&mut word) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let source = i32::from_le_bytes(word);
        input.read_exact(&mut word)?;
        let target = i32::from_le_bytes(word);
        input.read_exact(&mut word)?;
        let len = u32::from_le_bytes(word) as usize;
        let mut label = vec![0u8; len];
        input.read_exact(&mut label)?;
        let label = String::from_utf8(label).map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        input.read_exact(&mut word)?;
        let count = i32::from_le_bytes(word);
        Ok(Some(Self { source, target, label, count }))
    }
}

/// Write the transfers and choices of `schedule` to `path`.
pub fn save(schedule: &Schedule, path: &Path) -> Result<usize, EngineError> {
    let file = File::create(path).map_err(|e| io_error(path, &e))?;
    let mut out = BufWriter::new(file);
    let mut written = 0;
    for point in schedule.iter() {
        if let Some(record) = Record::from_point(point)? {
            record.write_to(&mut out).map_err(|e| io_error(path, &e))?;
            written += 1;
        }
    }
    out.flush().map_err(|e| io_error(path, &e))?;
    info!(path = %path.display(), records = written, "schedule saved");
    Ok(written)
}

/// Read a schedule written by [`save`]. Thread ids are placeholders.
pub fn load(path: &Path) -> Result<Schedule, EngineError> {
    let file = File::open(path).map_err(|e| io_error(path, &e))?;
    let mut input = BufReader::new(file);
    let mut schedule = Schedule::new();
    while let Some(record) = Record::read_from(&mut input).map_err(|e| io_error(path, &e))? {
        schedule.add_last(record.into_point()?);
    }
    info!(path = %path.display(), points = schedule.len(), "schedule loaded");
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MAIN_LABEL;

    fn sample() -> Schedule {
        let mut s = Schedule::new();
        let main = YieldPoint::new(ThreadId::MAIN, MAIN_LABEL, None, None);
        s.add_last(SchedulePoint::Transfer(TransferPoint::new(main, Some(ThreadId(1)))));
        s.add_last(SchedulePoint::Yield(YieldPoint::new(ThreadId(1), "read", None, None)));
        let mut at = YieldPoint::new(ThreadId(1), "write", None, None);
        at.count = 3;
        s.add_last(SchedulePoint::Transfer(TransferPoint::new(at, Some(ThreadId::MAIN))));
        let mut choice = ChoicePoint::new(ThreadId(2), 4);
        choice.value = 2;
        s.add_last(SchedulePoint::Choice(choice));
        s
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sched");

        assert_eq!(save(&sample(), &path).unwrap(), 3);
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.len(), 3);
        assert!(!loaded.is_resolved());
        let trans = loaded.transitions();
        assert_eq!(trans[1].label, "write");
        assert_eq!(trans[1].count, 3);
        let choice = loaded.iter().find_map(SchedulePoint::as_choice).copied().unwrap();
        assert_eq!((choice.value, choice.arity), (2, 4));
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.sched");
        let mut bytes = Vec::new();
        Record { source: 0, target: 1, label: "main".into(), count: 1 }.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(load(&path), Err(EngineError::ScheduleFile(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(load(Path::new("/nonexistent/weft.sched")), Err(EngineError::ScheduleFile(_))));
    }
}
