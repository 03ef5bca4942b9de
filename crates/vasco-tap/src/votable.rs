//! Chunk CSV → VOTable encoding for `TAP_UPLOAD`.
//!
//! Only `row_id`, `ra` and `dec` are uploaded. `row_id` is sent as a char
//! column so identifiers with leading zeros survive the round trip.

use std::fmt::Write as _;

use vasco_core::{CsvTable, Error, Result};

/// Encode a positions CSV as a single-table VOTable document.
pub fn positions_to_votable(csv: &str, table_name: &str) -> Result<String> {
    let table = CsvTable::parse(csv)?;
    let id_col = table.require_column("row_id")?;
    let ra_col = table.require_column("ra")?;
    let dec_col = table.require_column("dec")?;

    if table.is_empty() {
        return Err(Error::InvalidInput("chunk has no rows".into()));
    }

    let mut out = String::with_capacity(256 + table.len() * 64);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<VOTABLE version=\"1.3\" xmlns=\"http://www.ivoa.net/xml/VOTable/v1.3\">\n");
    out.push_str("<RESOURCE type=\"results\">\n");
    let _ = writeln!(out, "<TABLE name=\"{}\">", escape(table_name));
    out.push_str("<FIELD name=\"row_id\" datatype=\"char\" arraysize=\"*\"/>\n");
    out.push_str("<FIELD name=\"ra\" datatype=\"double\" unit=\"deg\" ucd=\"pos.eq.ra;meta.main\"/>\n");
    out.push_str("<FIELD name=\"dec\" datatype=\"double\" unit=\"deg\" ucd=\"pos.eq.dec;meta.main\"/>\n");
    out.push_str("<DATA><TABLEDATA>\n");

    for (idx, row) in table.rows.iter().enumerate() {
        let row_id = row[id_col].trim();
        if row_id.is_empty() {
            return Err(Error::InvalidInput(format!("line {}: empty row_id", idx + 2)));
        }
        let ra = table
            .number(idx, ra_col)
            .ok_or_else(|| Error::InvalidInput(format!("line {}: bad ra", idx + 2)))?;
        let dec = table
            .number(idx, dec_col)
            .ok_or_else(|| Error::InvalidInput(format!("line {}: bad dec", idx + 2)))?;
        let _ = writeln!(
            out,
            "<TR><TD>{}</TD><TD>{}</TD><TD>{}</TD></TR>",
            escape(row_id),
            ra,
            dec
        );
    }

    out.push_str("</TABLEDATA></DATA>\n</TABLE>\n</RESOURCE>\n</VOTABLE>\n");
    Ok(out)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_rows_and_fields() {
        let vot = positions_to_votable(
            "row_id,ra,dec,extra\n00017,10.5,-5.25,x\n18,359.9,89.0,y\n",
            "my_positions",
        )
        .unwrap();

        assert!(vot.contains("<TABLE name=\"my_positions\">"));
        assert!(vot.contains("<FIELD name=\"row_id\" datatype=\"char\""));
        assert!(vot.contains("<TR><TD>00017</TD><TD>10.5</TD><TD>-5.25</TD></TR>"));
        assert!(vot.contains("<TR><TD>18</TD><TD>359.9</TD><TD>89</TD></TR>"));
        assert!(!vot.contains("extra"));
    }

    #[test]
    fn test_escapes_row_id() {
        let vot = positions_to_votable("row_id,ra,dec\na<b&c,1,2\n", "t").unwrap();
        assert!(vot.contains("<TD>a&lt;b&amp;c</TD>"));
    }

    #[test]
    fn test_missing_column_rejected() {
        let err = positions_to_votable("id,ra,dec\n1,2,3\n", "t").unwrap_err();
        assert!(err.to_string().contains("row_id"));
    }

    #[test]
    fn test_empty_chunk_rejected() {
        assert!(positions_to_votable("row_id,ra,dec\n", "t").is_err());
    }

    #[test]
    fn test_non_numeric_coordinate_rejected() {
        let err = positions_to_votable("row_id,ra,dec\n1,abc,2\n", "t").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
