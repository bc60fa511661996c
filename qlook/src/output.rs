//! Rendering lookup results.

use std::cmp::max;

use anyhow::Result;
use owo_colors::{OwoColorize, Style};
use qlook::Entry;
use qlook_proto::{Message, NonOptRecord, RCode, Rdata};

use crate::args::OutputFormat;

pub fn print_entries(entries: &[Entry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Pretty => {
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_pretty(entry, entries.len() > 1);
            }
        }
        OutputFormat::Column => print!("{}", columns(entries)),
        #[cfg(feature = "json")]
        OutputFormat::Json => {
            use anyhow::Context;
            let json =
                serde_json::to_string_pretty(entries).context("Could not serialize results.")?;
            println!("{}", json);
        }
        OutputFormat::Raw => {
            let output = owo_colors::Stream::Stdout;
            for entry in entries {
                for reply in &entry.replies {
                    match reply {
                        Some(reply) => println!("{}", reply.as_string(Some(output))),
                        None => println!("{}\n", no_reply(&entry.server)),
                    }
                }
            }
        }
    }
    Ok(())
}

/// One tab-separated line per answer record, headed by the column names.
fn columns(entries: &[Entry]) -> String {
    let mut out = String::from("SERVER\tNAME\tTTL\tCLASS\tTYPE\tDATA\tPTR\n");
    for entry in entries {
        for record in entry.replies.iter().flatten().flat_map(Message::answer_records) {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                entry.server,
                record.owner,
                record.ttl,
                record.class,
                record.rtype,
                record.rdata,
                ptr_name(entry, record).unwrap_or("-"),
            ));
        }
    }
    out
}

fn no_reply(server: &str) -> String {
    format!("<no reply from {}>", server)
        .if_supports_color(owo_colors::Stream::Stdout, |s| s.red())
        .to_string()
}

fn print_pretty(entry: &Entry, print_server: bool) {
    let output = owo_colors::Stream::Stdout;
    let headline_style = owo_colors::style().bold().blue();

    if print_server {
        println!(
            "{}",
            format!("{}:", entry.server).if_supports_color(output, |text| text.style(headline_style))
        );
    }

    let answers: Vec<&NonOptRecord> = entry
        .replies
        .iter()
        .flatten()
        .flat_map(Message::answer_records)
        .collect();

    let (mut max_owner_len, mut max_type_len) = (0, 0);
    for answer in &answers {
        max_owner_len = max(max_owner_len, answer.owner.string_len());
        max_type_len = max(max_type_len, answer.rtype.to_string().len());
    }

    if answers.is_empty() {
        println!("<empty response>");
    }
    for answer in &answers {
        let line = answer.as_string(Some(max_owner_len), Some(max_type_len), Some(output));
        match ptr_name(entry, answer) {
            Some(ptr) => println!(
                "{}  {}",
                line,
                format!("({})", ptr).if_supports_color(output, |s| s.dimmed())
            ),
            None => println!("{}", line),
        }
    }

    let rcodes: Vec<String> = entry
        .replies
        .iter()
        .map(|reply| match reply {
            Some(reply) => {
                let rcode = reply.rcode();
                let style = if rcode == RCode::NOERROR {
                    Style::new().green()
                } else {
                    Style::new().red()
                };
                rcode
                    .to_string()
                    .if_supports_color(output, |s| s.style(style))
                    .to_string()
            }
            None => "FAILED".if_supports_color(output, |s| s.red()).to_string(),
        })
        .collect();

    println!();
    println!(
        "{} from {} in {} ms",
        rcodes.join(", "),
        entry.server,
        entry.time.as_millis()
    );
}

fn ptr_name<'a>(entry: &'a Entry, record: &NonOptRecord) -> Option<&'a str> {
    let ip = match &record.rdata {
        Rdata::A(a) => a.address.to_string(),
        Rdata::AAAA(aaaa) => aaaa.address.to_string(),
        _ => return None,
    };
    entry.ptrs.get(&ip).map(String::as_str)
}
