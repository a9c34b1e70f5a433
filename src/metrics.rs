//! Prometheus text exposition (format 0.0.4) of a probe cycle.

use std::fmt::Write;

use crate::{
    domain::{item::Item, probe::CycleReport},
    network_client::is_ipv6,
};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn render(report: &CycleReport) -> String {
    let mut out = String::new();

    header(
        &mut out,
        "tcp_port_available",
        "Whether a TCP connection to the resolved address succeeded (1) or not (0).",
    );
    for result in report.results() {
        let address = result.address.to_string();
        let ip_version = if is_ipv6(&address) { "6" } else { "4" };
        let mut labels = item_labels(&result.item);
        labels.push(("network", result.item.network.clone()));
        labels.push(("port", result.item.port.to_string()));
        labels.push(("address", address));
        labels.push(("ip_version", ip_version.to_string()));
        sample(&mut out, "tcp_port_available", &labels, u8::from(result.available));
    }

    header(
        &mut out,
        "tcp_port_resolved_addresses",
        "Number of addresses the resource host resolved to.",
    );
    for item_report in &report.items {
        let count = item_report.resolution.as_ref().map_or(0, Vec::len);
        sample(
            &mut out,
            "tcp_port_resolved_addresses",
            &host_labels(&item_report.item),
            count,
        );
    }

    header(
        &mut out,
        "tcp_port_resolve_failed",
        "Whether resolving the resource host failed (1) or not (0).",
    );
    for item_report in &report.items {
        sample(
            &mut out,
            "tcp_port_resolve_failed",
            &host_labels(&item_report.item),
            u8::from(item_report.resolution.is_err()),
        );
    }

    header(
        &mut out,
        "tcp_port_probe_cycle_duration_seconds",
        "Wall time spent on the probe cycle backing this scrape.",
    );
    sample(
        &mut out,
        "tcp_port_probe_cycle_duration_seconds",
        &[],
        report.duration.as_secs_f64(),
    );

    out
}

fn item_labels(item: &Item) -> Vec<(&'static str, String)> {
    vec![
        ("resource", item.resource.clone()),
        ("group", item.group.clone().unwrap_or_default()),
        ("alias", item.alias.clone().unwrap_or_default()),
    ]
}

fn host_labels(item: &Item) -> Vec<(&'static str, String)> {
    let mut labels = item_labels(item);
    labels.push(("host", item.host.clone()));
    labels
}

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

fn sample(out: &mut String, name: &str, labels: &[(&str, String)], value: impl std::fmt::Display) {
    out.push_str(name);
    if !labels.is_empty() {
        out.push('{');
        for (index, (key, label)) in labels.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            let _ = write!(out, "{key}=\"{}\"", escape_label_value(label));
        }
        out.push('}');
    }
    let _ = writeln!(out, " {value}");
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}
