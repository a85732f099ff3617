//! CSV logs in and out of the estimator.

use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use uwbfuse_core::{Estimate, ImuSample, SensorEvent};
use uwbfuse_sim::TimedEvent;

// ---------------------------------------------------------------------------
// Input rows
// ---------------------------------------------------------------------------

/// `timestamp,gx,gy,gz,ax,ay,az`
#[derive(Debug, Deserialize)]
struct ImuRow {
    timestamp: f64,
    gx: f64,
    gy: f64,
    gz: f64,
    ax: f64,
    ay: f64,
    az: f64,
}

/// `timestamp,x,y[,arrival]`. Without an arrival column the fix is assumed
/// to arrive at its own timestamp.
#[derive(Debug, Deserialize)]
struct UwbRow {
    timestamp: f64,
    x: f64,
    y: f64,
    #[serde(default)]
    arrival: Option<f64>,
}

pub fn read_imu<R: Read>(reader: R) -> Result<Vec<TimedEvent>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut events = Vec::new();
    for (line, row) in rdr.deserialize::<ImuRow>().enumerate() {
        let row = row.with_context(|| format!("bad IMU record {}", line + 1))?;
        events.push(TimedEvent {
            arrival_s: row.timestamp,
            event: SensorEvent::Inertial {
                timestamp_s: row.timestamp,
                sample: ImuSample::new(
                    Vector3::new(row.gx, row.gy, row.gz),
                    Vector3::new(row.ax, row.ay, row.az),
                ),
            },
        });
    }
    Ok(events)
}

pub fn read_uwb<R: Read>(reader: R) -> Result<Vec<TimedEvent>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut events = Vec::new();
    for (line, row) in rdr.deserialize::<UwbRow>().enumerate() {
        let row = row.with_context(|| format!("bad UWB record {}", line + 1))?;
        events.push(TimedEvent {
            arrival_s: row.arrival.unwrap_or(row.timestamp),
            event: SensorEvent::Position {
                timestamp_s: row.timestamp,
                x: row.x,
                y: row.y,
            },
        });
    }
    Ok(events)
}

pub fn read_imu_file(path: &Path) -> Result<Vec<TimedEvent>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_imu(file).with_context(|| format!("reading {}", path.display()))
}

pub fn read_uwb_file(path: &Path) -> Result<Vec<TimedEvent>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_uwb(file).with_context(|| format!("reading {}", path.display()))
}

/// Interleave both streams by arrival time; IMU wins ties.
pub fn merge_by_arrival(imu: Vec<TimedEvent>, uwb: Vec<TimedEvent>) -> Vec<TimedEvent> {
    let mut events = imu;
    events.extend(uwb);
    events.sort_by(|a, b| a.arrival_s.total_cmp(&b.arrival_s));
    events
}

// ---------------------------------------------------------------------------
// Output rows
// ---------------------------------------------------------------------------
#[derive(Debug, Serialize)]
struct EstimateRow {
    timestamp: f64,
    qw: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    px: f64,
    py: f64,
    pz: f64,
    vx: f64,
    vy: f64,
    vz: f64,
    truth_x: Option<f64>,
    truth_y: Option<f64>,
    truth_z: Option<f64>,
}

impl EstimateRow {
    fn new(e: &Estimate, truth: Option<Vector3<f64>>) -> Self {
        let q = e.orientation.quaternion();
        Self {
            timestamp: e.timestamp_s,
            qw: q.w,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            px: e.position.x,
            py: e.position.y,
            pz: e.position.z,
            vx: e.velocity.x,
            vy: e.velocity.y,
            vz: e.velocity.z,
            truth_x: truth.map(|t| t.x),
            truth_y: truth.map(|t| t.y),
            truth_z: truth.map(|t| t.z),
        }
    }
}

/// Write estimates, each optionally paired with a truth position.
pub fn write_estimates<'a, W, I>(writer: W, rows: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a Estimate, Option<Vector3<f64>>)>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    for (estimate, truth) in rows {
        wtr.serialize(EstimateRow::new(estimate, truth))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_estimates_file<'a, I>(path: &Path, rows: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a Estimate, Option<Vector3<f64>>)>,
{
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_estimates(file, rows).with_context(|| format!("writing {}", path.display()))
}
