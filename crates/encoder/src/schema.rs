use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

pub const SCHEMA_VERSION: &str = "2.0";
pub const SCHEMA_TYPE: &str = "batch-aircraft";

/// The fixed aviation schema. Only the three key columns are required;
/// everything else is nullable.
pub fn aviation_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        // Keys
        Field::new("snapshot_timestamp", DataType::Int64, false),
        Field::new("icao_address", DataType::Utf8, false),
        Field::new("snapshot_total_messages", DataType::Int32, false),
        // Identity
        Field::new("callsign", DataType::Utf8, true),
        Field::new("registration", DataType::Utf8, true),
        Field::new("aircraft_type", DataType::Utf8, true),
        Field::new("type_description", DataType::Utf8, true),
        Field::new("emitter_category", DataType::Utf8, true),
        // Position
        Field::new("latitude", DataType::Float64, true),
        Field::new("longitude", DataType::Float64, true),
        Field::new("position_source", DataType::Utf8, true),
        // Altitude
        Field::new("altitude_baro_ft", DataType::Int32, true),
        Field::new("altitude_geom_ft", DataType::Int32, true),
        Field::new("vertical_rate_baro_fpm", DataType::Int32, true),
        Field::new("vertical_rate_geom_fpm", DataType::Int32, true),
        // Speed
        Field::new("ground_speed_kts", DataType::Float64, true),
        Field::new("indicated_airspeed_kts", DataType::Int32, true),
        Field::new("true_airspeed_kts", DataType::Int32, true),
        Field::new("mach_number", DataType::Float64, true),
        // Heading
        Field::new("track_degrees", DataType::Float64, true),
        Field::new("track_rate_deg_sec", DataType::Float64, true),
        Field::new("magnetic_heading_degrees", DataType::Float64, true),
        Field::new("true_heading_degrees", DataType::Float64, true),
        Field::new("roll_degrees", DataType::Float64, true),
        // Met
        Field::new("wind_direction_degrees", DataType::Int32, true),
        Field::new("wind_speed_kts", DataType::Int32, true),
        Field::new("outside_air_temp_c", DataType::Int32, true),
        Field::new("total_air_temp_c", DataType::Int32, true),
        // FMS
        Field::new("nav_qnh_mb", DataType::Float64, true),
        Field::new("nav_heading_degrees", DataType::Float64, true),
        Field::new("nav_altitude_mcp_ft", DataType::Int32, true),
        Field::new("nav_altitude_fms_ft", DataType::Int32, true),
        // Transponder
        Field::new("squawk_code", DataType::Utf8, true),
        Field::new("emergency_status", DataType::Utf8, true),
        Field::new("spi_flag", DataType::Boolean, true),
        Field::new("alert_flag", DataType::Boolean, true),
        // Quality
        Field::new("adsb_version", DataType::Int32, true),
        Field::new("navigation_integrity_category", DataType::Int32, true),
        Field::new("navigation_accuracy_position", DataType::Int32, true),
        Field::new("navigation_accuracy_velocity", DataType::Int32, true),
        Field::new("source_integrity_level", DataType::Int32, true),
        Field::new("source_integrity_level_type", DataType::Utf8, true),
        Field::new("geometric_vertical_accuracy", DataType::Int32, true),
        Field::new("system_design_assurance", DataType::Int32, true),
        Field::new("nic_baro", DataType::Int32, true),
        Field::new("radius_of_containment", DataType::Int32, true),
        // Reception
        Field::new("messages_received", DataType::Int64, true),
        Field::new("last_seen_seconds", DataType::Float64, true),
        Field::new("last_position_seen_seconds", DataType::Float64, true),
        Field::new("rssi_dbm", DataType::Float64, true),
        // Geometry relative to the receiver
        Field::new("distance_from_receiver_nm", DataType::Float64, true),
        Field::new("bearing_from_receiver_degrees", DataType::Float64, true),
        // Lineage
        Field::new("database_flags", DataType::Int32, true),
    ]))
}
