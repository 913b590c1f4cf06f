use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use telefuse::{
    config::{Config, parse_config},
    pipeline::{Error, Pipeline},
    source::{CATALOG_FILE, KPI_MAP_FILE, metric_type_dir, sample_path},
};
use telefuse_capture::{
    catalog::{Catalog, Entry},
    frame::Frame,
    kpi_map,
    sample::{RawSample, ValueKind, write_samples_file},
};

/// Writes a collection run directory the way a poller would.
struct Run {
    root: PathBuf,
}

impl Run {
    fn new(root: &Path) -> Self {
        fs::create_dir_all(root).expect("mkdir");
        Self {
            root: root.to_path_buf(),
        }
    }

    fn metric(&self, index: u32, metric_type: &str) -> &Self {
        Catalog::append(
            &self.root.join(CATALOG_FILE),
            &Entry {
                index,
                metric_type: metric_type.to_string(),
            },
        )
        .expect("catalog");
        fs::create_dir_all(metric_type_dir(&self.root, index)).expect("mkdir");
        self
    }

    /// Add KPI `local` to metric type `index`; `labels` is the raw JSON
    /// object written to the KPI map, so key order is the caller's.
    fn kpi(&self, index: u32, local: u32, labels: &str, samples: &[(i64, f64)]) -> &Self {
        let samples: Vec<RawSample> = samples
            .iter()
            .map(|(ts, v)| RawSample::scalar(*ts, *v))
            .collect();
        self.kpi_of_kind(index, local, labels, ValueKind::Scalar, &samples)
    }

    fn kpi_of_kind(
        &self,
        index: u32,
        local: u32,
        labels: &str,
        kind: ValueKind,
        samples: &[RawSample],
    ) -> &Self {
        let path = metric_type_dir(&self.root, index).join(KPI_MAP_FILE);
        let mut fp = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open kpi map");
        writeln!(fp, "{{\"index\":{local},\"kpi\":{labels}}}").expect("write kpi map");
        write_samples_file(&sample_path(&self.root, index, local), kind, samples).expect("samples");
        self
    }
}

fn config(output: &Path, sources: &[(&str, &Path)], extra: &str) -> Config {
    let mut yaml = String::from("sources:\n");
    for (id, path) in sources {
        yaml.push_str(&format!("  - id: {id}\n    path: '{}'\n", path.display()));
    }
    yaml.push_str(&format!("output: '{}'\n", output.display()));
    yaml.push_str(extra);
    parse_config(&yaml).expect("valid config")
}

fn varying(offset: f64) -> Vec<(i64, f64)> {
    vec![(60, offset), (120, offset + 1.0), (180, offset + 3.0)]
}

fn wide(output: &Path) -> Frame {
    Frame::read_csv_file(&output.join("complete-time-series.csv")).expect("wide table")
}

fn column_names(frame: &Frame) -> Vec<String> {
    frame.columns().iter().map(|c| c.name.clone()).collect()
}

#[test]
fn label_order_does_not_split_a_kpi() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, b, out) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("out"));
    Run::new(&a)
        .metric(1, "custom/requests")
        .kpi(1, 1, r#"{"ns":"a","pod":"p1"}"#, &[(60, 1.0), (120, 2.0)]);
    Run::new(&b)
        .metric(1, "custom/requests")
        .kpi(1, 3, r#"{"pod":"p1","ns":"a"}"#, &[(180, 4.0)]);

    let summary = Pipeline::new(config(&out, &[("a", &a), ("b", &b)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(summary.kpis, 1);

    let map = kpi_map::read_json_file(&out.join("combined/metric-1-kpi-map.json")).expect("map");
    assert_eq!(map.len(), 1);
    assert_eq!(map[0].index, 1);
    assert_eq!(map[0].kpi.get("pod"), Some("p1"));

    let combined = Frame::read_csv_file(&out.join("combined/metric-1.csv")).expect("combined");
    assert_eq!(column_names(&combined), vec!["kpi-1-value"]);
    assert_eq!(combined.timestamps(), &[60, 120, 180]);
}

#[test]
fn many_containers_of_one_pod_group_by_container() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    let run = Run::new(&a);
    run.metric(1, "kubernetes.io/container/cpu/core_usage_time");
    for n in 0..20_u32 {
        let labels = format!(r#"{{"pod":"alms-api-1","container":"c{n}","namespace":"alms"}}"#);
        run.kpi(1, n + 1, &labels, &varying(f64::from(n)));
    }

    let summary = Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(summary.retained, 20);
    assert_eq!(summary.groups, 20);

    let map = kpi_map::read_json_file(&out.join("aggregated/metric-1-kpi-map.json")).expect("map");
    assert_eq!(map.len(), 20);
    assert!(map.iter().all(|r| r.kpi.len() == 1 && r.kpi.get("container").is_some()));
}

#[test]
fn gcloud_container_names_group_by_container() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    let run = Run::new(&a);
    run.metric(1, "kubernetes.io/container/cpu/core_usage_time");
    for n in 0..20_u32 {
        let labels = format!(
            r#"{{"pod_name":"alms-api-1","container_name":"c{n}","namespace_name":"alms"}}"#
        );
        run.kpi(1, n + 1, &labels, &varying(f64::from(n)));
    }

    let summary = Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(summary.groups, 20);

    let map = kpi_map::read_json_file(&out.join("aggregated/metric-1-kpi-map.json")).expect("map");
    assert_eq!(map.len(), 20);
    assert!(map.iter().all(|r| r.kpi.len() == 1 && r.kpi.get("container_name").is_some()));
}

#[test]
fn distribution_groups_spell_out_every_component() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    let run = Run::new(&a);
    run.metric(1, "custom/latency");
    // One container of its own and seventeen sharing another.
    for n in 0..18_u32 {
        let container = if n == 0 { "api" } else { "db" };
        let labels = format!(r#"{{"container":"{container}","replica":"r{n}"}}"#);
        let base = f64::from(n);
        let samples: Vec<RawSample> = [60, 120, 180]
            .iter()
            .zip([0.0, 1.0, 3.0])
            .map(|(ts, step)| RawSample::distribution(*ts, base + 1.0, base + step, 2.0))
            .collect();
        run.kpi_of_kind(1, n + 1, &labels, ValueKind::Distribution, &samples);
    }

    let summary = Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(summary.groups, 2);

    let stats = [
        "min", "max", "mean", "median", "std", "sum", "0.5", "0.75", "0.8", "0.9", "0.99",
    ];
    let mut expected: Vec<String> = ["count", "mean", "sd"]
        .iter()
        .map(|suffix| format!("metric-1-agg-kpi-1-{suffix}"))
        .collect();
    for suffix in ["count", "mean", "sd"] {
        for stat in stats {
            expected.push(format!("metric-1-agg-kpi-2-{stat}-{suffix}"));
        }
    }
    let table = wide(&out);
    assert_eq!(column_names(&table), expected);
    assert_eq!(table.timestamps(), &[60, 120, 180]);
    assert_eq!(
        table.column("metric-1-agg-kpi-1-mean").expect("col").values,
        vec![0.0, 1.0, 3.0]
    );
    assert_eq!(
        table.column("metric-1-agg-kpi-2-min-count").expect("col").values,
        vec![2.0, 2.0, 2.0]
    );
    assert_eq!(
        table.column("metric-1-agg-kpi-2-max-mean").expect("col").values,
        vec![17.0, 18.0, 20.0]
    );

    let map = kpi_map::read_json_file(&out.join("aggregated/metric-1-kpi-map.json")).expect("map");
    assert_eq!(map[0].kpi.get("container"), Some("api"));
    assert_eq!(map[1].kpi.get("container"), Some("db"));
}

#[test]
fn unreadable_sources_are_left_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, b, c, out) = (
        dir.path().join("a"),
        dir.path().join("b"),
        dir.path().join("c"),
        dir.path().join("out"),
    );
    Run::new(&a)
        .metric(1, "custom/requests")
        .kpi(1, 1, r#"{"pod":"p1"}"#, &varying(0.0));
    Run::new(&b)
        .metric(1, "custom/requests")
        .kpi(1, 1, r#"{"pod":"p1"}"#, &varying(100.0));
    fs::write(
        b.join(CATALOG_FILE),
        "index,metric_type\n1,custom/requests\nnot-a-number,custom/x\n",
    )
    .expect("catalog");
    Run::new(&c).metric(1, "custom/requests");
    fs::write(metric_type_dir(&c, 1).join(KPI_MAP_FILE), "{\"index\":1,\"kpi\":\n").expect("kpi map");

    let summary = Pipeline::new(config(&out, &[("a", &a), ("b", &b), ("c", &c)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.kpis, 1);

    let table = wide(&out);
    assert_eq!(column_names(&table), vec!["metric-1-agg-kpi-1"]);
    assert_eq!(
        table.column("metric-1-agg-kpi-1").expect("col").values,
        vec![0.0, 1.0, 3.0],
        "samples of the source with a broken catalog are not merged"
    );
}

#[test]
fn constant_series_never_reach_the_wide_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    Run::new(&a)
        .metric(1, "custom/flat")
        .kpi(1, 1, r#"{"pod":"p1"}"#, &[(60, 5.0), (120, 5.0), (180, 5.0)])
        .metric(2, "custom/moving")
        .kpi(2, 1, r#"{"pod":"p1"}"#, &varying(0.0));

    let summary = Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.empty, 1);
    assert!(!out.join("aggregated/metric-1.csv").exists());

    let table = wide(&out);
    assert_eq!(column_names(&table), vec!["metric-2-agg-kpi-1"]);
    assert_eq!(table.timestamps(), &[60, 120, 180]);
}

#[test]
fn counter_collisions_across_sources_are_summed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, b, out) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("out"));
    let labels = r#"{"alertname":"PodDown","alertstate":"firing","container":"api"}"#;
    Run::new(&a)
        .metric(1, "ALERTS")
        .kpi(1, 1, labels, &[(60, 1.0), (120, 2.0)]);
    Run::new(&b).metric(1, "ALERTS").kpi(1, 1, labels, &[(120, 3.0)]);

    Pipeline::new(config(&out, &[("a", &a), ("b", &b)], ""))
        .expect("pipeline")
        .run()
        .expect("run");

    let combined = Frame::read_csv_file(&out.join("combined/metric-1.csv")).expect("combined");
    assert_eq!(combined.column("kpi-1-value").expect("col").values, vec![1.0, 5.0]);
    let table = wide(&out);
    assert_eq!(table.column("metric-1-agg-kpi-1").expect("col").values, vec![1.0, 5.0]);
}

#[test]
fn small_metric_types_are_renamed_one_to_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    let run = Run::new(&a);
    run.metric(1, "custom/latency");
    for n in 0..10_u32 {
        let labels = format!(r#"{{"pod":"web-{n}","zone":"z{n}"}}"#);
        run.kpi(1, n + 1, &labels, &varying(f64::from(n) * 10.0));
    }

    Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");

    let combined = Frame::read_csv_file(&out.join("combined/metric-1.csv")).expect("combined");
    let aggregated = Frame::read_csv_file(&out.join("aggregated/metric-1.csv")).expect("aggregated");
    assert_eq!(aggregated.num_columns(), 10);
    for n in 1..=10 {
        assert_eq!(
            aggregated.column(&format!("agg-kpi-{n}")).expect("agg").values,
            combined.column(&format!("kpi-{n}-value")).expect("kpi").values
        );
    }
    let map = kpi_map::read_json_file(&out.join("aggregated/metric-1-kpi-map.json")).expect("map");
    assert_eq!(map[3].kpi.get("pod"), Some("web-3"));
    assert_eq!(map[3].kpi.get("zone"), Some("z3"));
}

#[test]
fn second_run_resumes_without_reprocessing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    Run::new(&a)
        .metric(1, "custom/requests")
        .kpi(1, 1, r#"{"pod":"p1"}"#, &varying(0.0))
        .metric(2, "custom/errors")
        .kpi(2, 1, r#"{"pod":"p1"}"#, &varying(2.0));

    let first = Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(first.processed, 2);
    let before = fs::read_to_string(out.join("complete-time-series.csv")).expect("wide");

    let second = Pipeline::new(config(&out, &[("a", &a)], ""))
        .expect("pipeline")
        .run()
        .expect("run");
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.columns, first.columns);
    let after = fs::read_to_string(out.join("complete-time-series.csv")).expect("wide");
    assert_eq!(before, after);

    let processed = Catalog::open(&out.join("metric_type_map.csv")).expect("processed");
    assert_eq!(processed.len(), 2);
}

#[test]
fn renumbered_collection_runs_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, b, out) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("out"));
    Run::new(&a).metric(1, "custom/requests");
    Run::new(&b).metric(1, "custom/errors");

    let result = Pipeline::new(config(&out, &[("a", &a), ("b", &b)], ""))
        .expect("pipeline")
        .run();
    match result {
        Err(Error::CatalogMismatch { source_id, .. }) => assert_eq!(source_id, "b"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!out.join("complete-time-series.csv").exists());
}

#[test]
fn load_test_statistics_join_the_wide_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (a, out) = (dir.path().join("a"), dir.path().join("out"));
    Run::new(&a)
        .metric(1, "custom/requests")
        .kpi(1, 1, r#"{"pod":"p1"}"#, &varying(0.0));
    let history = dir.path().join("stats_history.csv");
    fs::write(
        &history,
        "Timestamp,User Count,Type,Name,Requests/s\n\
         61,4,,Aggregated,1.5\n\
         62,9,GET,/items,7.0\n\
         119,6,,Aggregated,2.5\n",
    )
    .expect("history");

    let extra = format!("load_test:\n  path: '{}'\n", history.display());
    Pipeline::new(config(&out, &[("a", &a)], &extra))
        .expect("pipeline")
        .run()
        .expect("run");

    let table = wide(&out);
    assert_eq!(table.timestamps(), &[60, 120, 180]);
    assert_eq!(
        table.column("lm-User Count").expect("col").values,
        vec![4.0, 6.0, 0.0]
    );
    assert_eq!(
        table.column("lm-Requests/s").expect("col").values,
        vec![1.5, 2.5, 0.0]
    );
}
