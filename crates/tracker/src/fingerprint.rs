use xxhash_rust::xxh3::xxh3_64;

use model::{AircraftObservation, ObservationValue};

/// Fast 64-bit fingerprint over the movement-relevant projection of an
/// observation. Equal input always yields equal output; missing fields
/// render as empty substrings.
pub fn fingerprint(observation: &AircraftObservation) -> u64 {
    xxh3_64(canonical_projection(observation).as_bytes())
}

fn canonical_projection(observation: &AircraftObservation) -> String {
    let fields: [&Option<ObservationValue>; 10] = [
        &observation.lat,
        &observation.lon,
        &observation.alt_baro,
        &observation.alt_geom,
        &observation.gs,
        &observation.track,
        &observation.baro_rate,
        &observation.squawk,
        &observation.emergency,
        &observation.flight,
    ];
    fields
        .iter()
        .map(|f| f.as_ref().map(|v| v.render()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::ObservationValue as V;

    fn observation() -> AircraftObservation {
        AircraftObservation {
            hex: Some("48436b".into()),
            flight: Some(V::Text("KLM855".into())),
            lat: Some(V::Number(40.9258)),
            lon: Some(V::Number(47.0615)),
            alt_baro: Some(V::Number(37000.0)),
            gs: Some(V::Number(575.3)),
            track: Some(V::Number(77.65)),
            squawk: Some(V::Text("6025".into())),
            emergency: Some(V::Text("none".into())),
            ..Default::default()
        }
    }

    #[test]
    fn equal_observations_share_a_fingerprint() {
        assert_eq!(fingerprint(&observation()), fingerprint(&observation()));
    }

    #[test]
    fn a_projected_field_change_changes_the_fingerprint() {
        let mut changed = observation();
        changed.alt_baro = Some(V::Number(37200.0));
        assert_ne!(fingerprint(&observation()), fingerprint(&changed));
    }

    #[test]
    fn unprojected_fields_do_not_affect_the_fingerprint() {
        let mut noisy = observation();
        noisy.rssi = Some(V::Number(-12.3));
        noisy.seen = Some(V::Number(0.2));
        noisy.messages = Some(V::Number(99_999.0));
        assert_eq!(fingerprint(&observation()), fingerprint(&noisy));
    }

    #[test]
    fn missing_fields_render_as_empty_substrings() {
        let empty = AircraftObservation::default();
        assert_eq!(canonical_projection(&empty), "|||||||||");
    }
}
