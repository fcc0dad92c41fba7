//! Query observation counts and case records.

use std::{io::Write, path::Path};

use serde::Serialize;

use crate::common::io::std::open_write_maybe_gz;

pub mod case;
pub mod seqvar;
pub mod strucvar;

/// Write `value` as pretty JSON to `path`, `-` being stdout.
pub fn write_json<P, T>(path: P, value: &T) -> Result<(), anyhow::Error>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let mut writer = open_write_maybe_gz(path)?;
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write `values` as JSON lines to `path`, `-` being stdout.
pub fn write_json_lines<'a, P, T, I>(path: P, values: I) -> Result<(), anyhow::Error>
where
    P: AsRef<Path>,
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut writer = open_write_maybe_gz(path)?;
    for value in values {
        serde_json::to_writer(&mut writer, value)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use temp_testdir::TempDir;

    #[test]
    fn write_json_to_file() -> Result<(), anyhow::Error> {
        let temp = TempDir::default();
        let path = temp.join("out.json");

        super::write_json(&path, &serde_json::json!({"observations": 2}))?;
        insta::assert_snapshot!(std::fs::read_to_string(&path)?, @r#"
        {
          "observations": 2
        }
        "#);

        Ok(())
    }

    #[test]
    fn write_json_lines_to_file() -> Result<(), anyhow::Error> {
        let temp = TempDir::default();
        let path = temp.join("out.jsonl");

        let values = vec![
            serde_json::json!({"case_id": "case1"}),
            serde_json::json!({"case_id": "case2"}),
        ];
        super::write_json_lines(&path, &values)?;
        insta::assert_snapshot!(std::fs::read_to_string(&path)?, @r#"
        {"case_id":"case1"}
        {"case_id":"case2"}
        "#);

        Ok(())
    }
}
