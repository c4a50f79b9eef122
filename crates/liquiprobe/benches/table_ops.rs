//! Table Oracle Benchmarks
//!
//! Extraction and sort/filter oracles over generated liquidation tables.
//!
//! Run with: `cargo bench --bench table_ops`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use liquiprobe::prelude::*;
use liquiprobe::table::{any_table, extract_from, parse_currency, parse_date, Row};
use liquiprobe::{Document, Node, Resolver};

fn amount(n: usize) -> String {
    format!("₱{},{:03}.{:02}", n % 900 + 1, n * 7 % 1000, n % 100)
}

fn table_doc(rows: usize) -> Document {
    let header = ["ID", "Amount", "Date"]
        .into_iter()
        .fold(Node::element("tr"), |tr, h| tr.child(Node::element("th").text(h)));
    let body = (0..rows).fold(Node::element("tbody"), |tbody, n| {
        tbody.child(
            Node::element("tr")
                .child(Node::element("td").text(format!("SDO-{n:04}")))
                .child(Node::element("td").text(amount(n)))
                .child(Node::element("td").text(format!("2024-{:02}-{:02}", n % 12 + 1, n % 28 + 1))),
        )
    });
    let table = Node::element("table")
        .child(Node::element("thead").child(header))
        .child(body);
    Document::new("http://lg.test/sdo", Node::element("body").child(table))
}

fn snapshot(rows: usize) -> TableSnapshot {
    TableSnapshot::new(
        ["ID", "Amount", "Date"],
        (0..rows)
            .map(|n| {
                Row::new([
                    format!("SDO-{n:04}"),
                    amount(n),
                    format!("2024-{:02}-{:02}", n % 12 + 1, n % 28 + 1),
                ])
            })
            .collect(),
    )
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    let resolver = Resolver::new();
    let query = any_table();

    for rows in [10, 100, 1_000] {
        let doc = table_doc(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &doc, |bench, doc| {
            bench.iter(|| black_box(extract_from(doc, &resolver, &query).unwrap()));
        });
    }

    group.finish();
}

fn bench_oracles(c: &mut Criterion) {
    let mut group = c.benchmark_group("oracle");
    let table = snapshot(1_000);

    group.bench_function("sorted_currency", |bench| {
        bench.iter(|| black_box(table.is_sorted_by(2, Comparator::Currency, SortOrder::Ascending).unwrap()));
    });
    group.bench_function("sorted_date", |bench| {
        bench.iter(|| black_box(table.is_sorted_by(3, Comparator::Date, SortOrder::Descending).unwrap()));
    });
    let predicate = CellPredicate::Contains("SDO-09".into());
    group.bench_function("contains_row", |bench| {
        bench.iter(|| black_box(table.contains_row_where(1, &predicate).unwrap()));
    });

    group.finish();
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.bench_function("currency", |bench| {
        bench.iter(|| parse_currency(black_box(Some("₱1,234,567.89"))));
    });
    group.bench_function("date_long_form", |bench| {
        bench.iter(|| parse_date(black_box("March 5, 2024 10:30 AM")));
    });
    group.finish();
}

criterion_group!(benches, bench_extract, bench_oracles, bench_parsing);
criterion_main!(benches);
