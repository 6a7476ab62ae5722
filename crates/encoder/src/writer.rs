use anyhow::{anyhow, Context, Result};
use arrow_array::{
    ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray,
};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use model::{AircraftBatch, ChangeEvent};

use crate::sanitize::{safe_boolean, safe_i32, safe_i64, safe_number, safe_string};
use crate::schema::aviation_schema;

/// An encoded batch, fully resident in memory. The temp file backing it is
/// already gone by the time this exists.
pub struct EncodedBatch {
    pub bytes: Vec<u8>,
    pub rows: usize,
    pub file_size_kb: u64,
}

/// One precomputed row of the aviation schema.
#[derive(Default)]
struct Row {
    snapshot_timestamp: i64,
    icao_address: String,
    snapshot_total_messages: i32,
    callsign: Option<String>,
    registration: Option<String>,
    aircraft_type: Option<String>,
    type_description: Option<String>,
    emitter_category: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    position_source: Option<String>,
    altitude_baro_ft: Option<i32>,
    altitude_geom_ft: Option<i32>,
    vertical_rate_baro_fpm: Option<i32>,
    vertical_rate_geom_fpm: Option<i32>,
    ground_speed_kts: Option<f64>,
    indicated_airspeed_kts: Option<i32>,
    true_airspeed_kts: Option<i32>,
    mach_number: Option<f64>,
    track_degrees: Option<f64>,
    track_rate_deg_sec: Option<f64>,
    magnetic_heading_degrees: Option<f64>,
    true_heading_degrees: Option<f64>,
    roll_degrees: Option<f64>,
    wind_direction_degrees: Option<i32>,
    wind_speed_kts: Option<i32>,
    outside_air_temp_c: Option<i32>,
    total_air_temp_c: Option<i32>,
    nav_qnh_mb: Option<f64>,
    nav_heading_degrees: Option<f64>,
    nav_altitude_mcp_ft: Option<i32>,
    nav_altitude_fms_ft: Option<i32>,
    squawk_code: Option<String>,
    emergency_status: Option<String>,
    spi_flag: Option<bool>,
    alert_flag: Option<bool>,
    adsb_version: Option<i32>,
    navigation_integrity_category: Option<i32>,
    navigation_accuracy_position: Option<i32>,
    navigation_accuracy_velocity: Option<i32>,
    source_integrity_level: Option<i32>,
    source_integrity_level_type: Option<String>,
    geometric_vertical_accuracy: Option<i32>,
    system_design_assurance: Option<i32>,
    nic_baro: Option<i32>,
    radius_of_containment: Option<i32>,
    messages_received: Option<i64>,
    last_seen_seconds: Option<f64>,
    last_position_seen_seconds: Option<f64>,
    rssi_dbm: Option<f64>,
    distance_from_receiver_nm: Option<f64>,
    bearing_from_receiver_degrees: Option<f64>,
    database_flags: Option<i32>,
}

impl Row {
    fn from_event(event: &ChangeEvent) -> Self {
        let obs = &event.observation;
        Row {
            snapshot_timestamp: event.snapshot_seconds * 1000,
            icao_address: event.hex.clone(),
            snapshot_total_messages: event.snapshot_total_messages.clamp(0, i32::MAX as i64)
                as i32,
            callsign: obs.callsign(),
            registration: safe_string(obs.r.as_ref()),
            aircraft_type: safe_string(obs.t.as_ref()),
            type_description: safe_string(obs.desc.as_ref()),
            emitter_category: safe_string(obs.category.as_ref()),
            latitude: safe_number(obs.lat.as_ref()),
            longitude: safe_number(obs.lon.as_ref()),
            position_source: safe_string(obs.position_source.as_ref()),
            altitude_baro_ft: safe_i32(obs.alt_baro.as_ref()),
            altitude_geom_ft: safe_i32(obs.alt_geom.as_ref()),
            vertical_rate_baro_fpm: safe_i32(obs.baro_rate.as_ref()),
            vertical_rate_geom_fpm: safe_i32(obs.geom_rate.as_ref()),
            ground_speed_kts: safe_number(obs.gs.as_ref()),
            indicated_airspeed_kts: safe_i32(obs.ias.as_ref()),
            true_airspeed_kts: safe_i32(obs.tas.as_ref()),
            mach_number: safe_number(obs.mach.as_ref()),
            track_degrees: safe_number(obs.track.as_ref()),
            track_rate_deg_sec: safe_number(obs.track_rate.as_ref()),
            magnetic_heading_degrees: safe_number(obs.mag_heading.as_ref()),
            true_heading_degrees: safe_number(obs.true_heading.as_ref()),
            roll_degrees: safe_number(obs.roll.as_ref()),
            wind_direction_degrees: safe_i32(obs.wd.as_ref()),
            wind_speed_kts: safe_i32(obs.ws.as_ref()),
            outside_air_temp_c: safe_i32(obs.oat.as_ref()),
            total_air_temp_c: safe_i32(obs.tat.as_ref()),
            nav_qnh_mb: safe_number(obs.nav_qnh.as_ref()),
            nav_heading_degrees: safe_number(obs.nav_heading.as_ref()),
            nav_altitude_mcp_ft: safe_i32(obs.nav_altitude_mcp.as_ref()),
            nav_altitude_fms_ft: safe_i32(obs.nav_altitude_fms.as_ref()),
            squawk_code: safe_string(obs.squawk.as_ref()),
            emergency_status: safe_string(obs.emergency.as_ref()),
            spi_flag: safe_boolean(obs.spi.as_ref()),
            alert_flag: safe_boolean(obs.alert.as_ref()),
            adsb_version: safe_i32(obs.version.as_ref()),
            navigation_integrity_category: safe_i32(obs.nic.as_ref()),
            navigation_accuracy_position: safe_i32(obs.nac_p.as_ref()),
            navigation_accuracy_velocity: safe_i32(obs.nac_v.as_ref()),
            source_integrity_level: safe_i32(obs.sil.as_ref()),
            source_integrity_level_type: safe_string(obs.sil_type.as_ref()),
            geometric_vertical_accuracy: safe_i32(obs.gva.as_ref()),
            system_design_assurance: safe_i32(obs.sda.as_ref()),
            nic_baro: safe_i32(obs.nic_baro.as_ref()),
            radius_of_containment: safe_i32(obs.rc.as_ref()),
            messages_received: safe_i64(obs.messages.as_ref()),
            last_seen_seconds: safe_number(obs.seen.as_ref()),
            last_position_seen_seconds: safe_number(obs.seen_pos.as_ref()),
            rssi_dbm: safe_number(obs.rssi.as_ref()),
            distance_from_receiver_nm: safe_number(obs.dst.as_ref()),
            bearing_from_receiver_degrees: safe_number(obs.dir.as_ref()),
            database_flags: safe_i32(obs.db_flags.as_ref()),
        }
    }
}

/// Encode a batch to Parquet (LZ4) and return the file bytes.
///
/// The file goes to tmpfs when the host has one so the write never touches
/// spinning storage; it is removed as soon as the bytes are read back.
pub fn encode_batch(batch: &AircraftBatch) -> Result<EncodedBatch> {
    if batch.events.is_empty() {
        return Err(anyhow!("refusing to encode an empty batch"));
    }

    let rows: Vec<Row> = batch.events.iter().map(Row::from_event).collect();
    let record_batch = build_record_batch(&rows)?;

    let dir = scratch_dir();
    let tmp = tempfile::Builder::new()
        .prefix("aircraft-batch-")
        .suffix(".parquet")
        .tempfile_in(&dir)
        .with_context(|| format!("creating batch temp file in {:?}", dir))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::LZ4)
        .build();
    let mut writer = ArrowWriter::try_new(
        tmp.as_file().try_clone()?,
        aviation_schema(),
        Some(props),
    )?;
    writer.write(&record_batch)?;
    writer.close()?;

    let bytes = std::fs::read(tmp.path())?;
    // Dropping the handle unlinks the file; from here on only the buffer
    // exists.
    drop(tmp);

    let file_size_kb = ((bytes.len() as u64) + 1023) / 1024;
    debug!(
        "Encoded batch {}: {} rows, {} bytes ({} KB)",
        batch.batch_id,
        rows.len(),
        bytes.len(),
        file_size_kb
    );

    Ok(EncodedBatch {
        rows: rows.len(),
        file_size_kb,
        bytes,
    })
}

fn scratch_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn build_record_batch(rows: &[Row]) -> Result<RecordBatch> {
    let strings = |f: fn(&Row) -> Option<&str>| -> ArrayRef {
        Arc::new(StringArray::from(
            rows.iter().map(f).collect::<Vec<_>>(),
        ))
    };
    let doubles = |f: fn(&Row) -> Option<f64>| -> ArrayRef {
        Arc::new(Float64Array::from(
            rows.iter().map(f).collect::<Vec<_>>(),
        ))
    };
    let ints = |f: fn(&Row) -> Option<i32>| -> ArrayRef {
        Arc::new(Int32Array::from(rows.iter().map(f).collect::<Vec<_>>()))
    };
    let bools = |f: fn(&Row) -> Option<bool>| -> ArrayRef {
        Arc::new(BooleanArray::from(
            rows.iter().map(f).collect::<Vec<_>>(),
        ))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.snapshot_timestamp).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.icao_address.as_str()).collect::<Vec<_>>(),
        )),
        Arc::new(Int32Array::from(
            rows.iter()
                .map(|r| r.snapshot_total_messages)
                .collect::<Vec<_>>(),
        )),
        strings(|r| r.callsign.as_deref()),
        strings(|r| r.registration.as_deref()),
        strings(|r| r.aircraft_type.as_deref()),
        strings(|r| r.type_description.as_deref()),
        strings(|r| r.emitter_category.as_deref()),
        doubles(|r| r.latitude),
        doubles(|r| r.longitude),
        strings(|r| r.position_source.as_deref()),
        ints(|r| r.altitude_baro_ft),
        ints(|r| r.altitude_geom_ft),
        ints(|r| r.vertical_rate_baro_fpm),
        ints(|r| r.vertical_rate_geom_fpm),
        doubles(|r| r.ground_speed_kts),
        ints(|r| r.indicated_airspeed_kts),
        ints(|r| r.true_airspeed_kts),
        doubles(|r| r.mach_number),
        doubles(|r| r.track_degrees),
        doubles(|r| r.track_rate_deg_sec),
        doubles(|r| r.magnetic_heading_degrees),
        doubles(|r| r.true_heading_degrees),
        doubles(|r| r.roll_degrees),
        ints(|r| r.wind_direction_degrees),
        ints(|r| r.wind_speed_kts),
        ints(|r| r.outside_air_temp_c),
        ints(|r| r.total_air_temp_c),
        doubles(|r| r.nav_qnh_mb),
        doubles(|r| r.nav_heading_degrees),
        ints(|r| r.nav_altitude_mcp_ft),
        ints(|r| r.nav_altitude_fms_ft),
        strings(|r| r.squawk_code.as_deref()),
        strings(|r| r.emergency_status.as_deref()),
        bools(|r| r.spi_flag),
        bools(|r| r.alert_flag),
        ints(|r| r.adsb_version),
        ints(|r| r.navigation_integrity_category),
        ints(|r| r.navigation_accuracy_position),
        ints(|r| r.navigation_accuracy_velocity),
        ints(|r| r.source_integrity_level),
        strings(|r| r.source_integrity_level_type.as_deref()),
        ints(|r| r.geometric_vertical_accuracy),
        ints(|r| r.system_design_assurance),
        ints(|r| r.nic_baro),
        ints(|r| r.radius_of_containment),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.messages_received).collect::<Vec<_>>(),
        )),
        doubles(|r| r.last_seen_seconds),
        doubles(|r| r.last_position_seen_seconds),
        doubles(|r| r.rssi_dbm),
        doubles(|r| r.distance_from_receiver_nm),
        doubles(|r| r.bearing_from_receiver_degrees),
        ints(|r| r.database_flags),
    ];

    RecordBatch::try_new(aviation_schema(), columns).context("assembling record batch")
}
