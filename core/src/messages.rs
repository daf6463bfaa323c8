//! Input streams for the run drivers.
//!
//! An [`ImuStream`] is the ordered inertial record that drives prediction. Each
//! [`MeasurementStream`] holds the absolute-position fixes of one sensor together with a
//! monotonic cursor marking the next fix that has not been consumed. Association is by nearest
//! timestamp: every fix inside the inertial time span is applied at the step whose timestamp is
//! closest to it, and only fixes outside that span are dropped.

use log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::ImuData;
use crate::error::{FilterError, Result};
use crate::measurements::{PositionMeasurement, Sensor};

/// Timestamped inertial sample
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Sample time in seconds
    pub timestamp: f64,
    pub data: ImuData,
}

/// Ordered inertial record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuStream {
    samples: Vec<ImuSample>,
}
impl ImuStream {
    /// Build a stream from parallel arrays of timestamps, specific force, and angular rate.
    ///
    /// Fails with [`FilterError::MalformedStream`] if the arrays differ in length, are empty,
    /// or contain a non-finite timestamp. Timestamp ordering is checked step by step while the
    /// stream is run so that the failing step can be reported.
    pub fn new(
        timestamps: Vec<f64>,
        accel: Vec<Vector3<f64>>,
        gyro: Vec<Vector3<f64>>,
    ) -> Result<ImuStream> {
        if timestamps.len() != accel.len() || timestamps.len() != gyro.len() {
            return Err(FilterError::MalformedStream(format!(
                "inertial arrays differ in length: {} timestamps, {} accel, {} gyro",
                timestamps.len(),
                accel.len(),
                gyro.len()
            )));
        }
        let samples = timestamps
            .into_iter()
            .zip(accel.into_iter().zip(gyro))
            .map(|(timestamp, (accel, gyro))| ImuSample {
                timestamp,
                data: ImuData { accel, gyro },
            })
            .collect();
        Self::from_samples(samples)
    }
    pub fn from_samples(samples: Vec<ImuSample>) -> Result<ImuStream> {
        if samples.is_empty() {
            return Err(FilterError::MalformedStream(
                "inertial stream is empty".into(),
            ));
        }
        if let Some(k) = samples.iter().position(|s| !s.timestamp.is_finite()) {
            return Err(FilterError::MalformedStream(format!(
                "inertial sample {k} has a non-finite timestamp"
            )));
        }
        Ok(ImuStream { samples })
    }
    pub fn samples(&self) -> &[ImuSample] {
        &self.samples
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn get(&self, k: usize) -> Option<&ImuSample> {
        self.samples.get(k)
    }
}

/// Absolute-position fixes from one sensor with a monotonic consumption cursor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStream {
    sensor: Sensor,
    measurements: Vec<PositionMeasurement>,
    cursor: usize,
}
impl MeasurementStream {
    /// Build a stream from parallel arrays of timestamps and positions.
    ///
    /// The fixes carry no noise of their own and are weighted with the filter's configured
    /// variance for `sensor`. Timestamps must be finite and non-decreasing.
    pub fn new(
        sensor: Sensor,
        timestamps: Vec<f64>,
        positions: Vec<Vector3<f64>>,
    ) -> Result<MeasurementStream> {
        if timestamps.len() != positions.len() {
            return Err(FilterError::MalformedStream(format!(
                "{sensor} arrays differ in length: {} timestamps, {} positions",
                timestamps.len(),
                positions.len()
            )));
        }
        let measurements = timestamps
            .into_iter()
            .zip(positions)
            .map(|(t, p)| PositionMeasurement::new(sensor, t, p))
            .collect();
        Self::from_measurements(sensor, measurements)
    }
    /// Build a stream from prepared measurements, which must all come from `sensor`
    pub fn from_measurements(
        sensor: Sensor,
        measurements: Vec<PositionMeasurement>,
    ) -> Result<MeasurementStream> {
        if let Some(m) = measurements.iter().find(|m| m.sensor != sensor) {
            return Err(FilterError::MalformedStream(format!(
                "{} measurement in {sensor} stream",
                m.sensor
            )));
        }
        if let Some(k) = measurements.iter().position(|m| !m.timestamp.is_finite()) {
            return Err(FilterError::MalformedStream(format!(
                "{sensor} measurement {k} has a non-finite timestamp"
            )));
        }
        if let Some(k) = measurements
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(FilterError::MalformedStream(format!(
                "{sensor} timestamps decrease at index {}",
                k + 1
            )));
        }
        Ok(MeasurementStream {
            sensor,
            measurements,
            cursor: 0,
        })
    }
    pub fn sensor(&self) -> Sensor {
        self.sensor
    }
    pub fn measurements(&self) -> &[PositionMeasurement] {
        &self.measurements
    }
    pub fn len(&self) -> usize {
        self.measurements.len()
    }
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
    /// Index of the next unconsumed measurement
    pub fn cursor(&self) -> usize {
        self.cursor
    }
    /// Number of measurements not yet consumed or dropped
    pub fn remaining(&self) -> usize {
        self.measurements.len() - self.cursor
    }
    /// Rewind the cursor to the first measurement
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
    /// Next unconsumed measurement without advancing
    pub fn peek(&self) -> Option<&PositionMeasurement> {
        self.measurements.get(self.cursor)
    }
    /// Drop every measurement older than `time - tolerance`; returns how many were dropped.
    ///
    /// Used before the first inertial step to discard fixes that precede the inertial record.
    pub fn skip_stale(&mut self, time: f64, tolerance: f64) -> usize {
        let start = self.cursor;
        while let Some(m) = self.peek() {
            if m.timestamp >= time - tolerance {
                break;
            }
            warn!(
                "dropping {} measurement at t = {:.6} s: precedes the inertial record starting at t = {time:.6} s",
                self.sensor, m.timestamp
            );
            self.cursor += 1;
        }
        self.cursor - start
    }
    /// Return the next measurement if the step at `time` is the one nearest to it, and advance
    /// the cursor.
    ///
    /// `next_time` is the timestamp of the following inertial step, or `None` at the last step.
    /// A measurement is due when it lies no further from `time` than from `next_time`, so one
    /// exactly halfway between two steps goes to the earlier step. At the last step only
    /// measurements up to `time + tolerance` are due. Later measurements stay queued.
    pub fn take_due(
        &mut self,
        time: f64,
        next_time: Option<f64>,
        tolerance: f64,
    ) -> Option<PositionMeasurement> {
        let m = *self.peek()?;
        let due = match next_time {
            Some(next) => (m.timestamp - time).abs() <= (m.timestamp - next).abs(),
            None => m.timestamp <= time + tolerance,
        };
        if due {
            self.cursor += 1;
            Some(m)
        } else {
            None
        }
    }
    /// Drop every measurement not yet consumed; returns how many were dropped
    pub fn discard_remaining(&mut self, end_time: f64) -> usize {
        for m in &self.measurements[self.cursor..] {
            warn!(
                "dropping {} measurement at t = {:.6} s: follows the inertial record ending at t = {end_time:.6} s",
                self.sensor, m.timestamp
            );
        }
        let dropped = self.remaining();
        self.cursor = self.measurements.len();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(timestamps: Vec<f64>) -> MeasurementStream {
        let positions = timestamps.iter().map(|t| Vector3::new(*t, 0.0, 0.0)).collect();
        MeasurementStream::new(Sensor::Gnss, timestamps, positions).unwrap()
    }

    #[test]
    fn imu_stream_validates_lengths() {
        let err = ImuStream::new(
            vec![0.0, 0.1],
            vec![Vector3::zeros(); 2],
            vec![Vector3::zeros(); 3],
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::MalformedStream(_)));
        assert!(ImuStream::new(vec![], vec![], vec![]).is_err());
        assert!(
            ImuStream::new(
                vec![0.0, f64::NAN],
                vec![Vector3::zeros(); 2],
                vec![Vector3::zeros(); 2]
            )
            .is_err()
        );
    }
    #[test]
    fn imu_stream_pairs_samples() {
        let imu = ImuStream::new(
            vec![0.0, 0.1],
            vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)],
            vec![Vector3::zeros(), Vector3::new(0.0, 0.0, 0.5)],
        )
        .unwrap();
        assert_eq!(imu.len(), 2);
        let s = imu.get(1).unwrap();
        assert_eq!(s.timestamp, 0.1);
        assert_eq!(s.data.accel[0], 2.0);
        assert_eq!(s.data.gyro[2], 0.5);
        assert!(imu.get(2).is_none());
    }
    #[test]
    fn measurement_stream_validation() {
        assert!(
            MeasurementStream::new(Sensor::Lidar, vec![0.0, 1.0], vec![Vector3::zeros()]).is_err()
        );
        let err = MeasurementStream::new(
            Sensor::Lidar,
            vec![1.0, 0.5],
            vec![Vector3::zeros(); 2],
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::MalformedStream(ref m) if m.contains("index 1")));
        let mixed = vec![PositionMeasurement::gnss(0.0, Vector3::zeros(), 0.1)];
        assert!(MeasurementStream::from_measurements(Sensor::Lidar, mixed).is_err());
        // Repeated timestamps are allowed
        assert!(stream(vec![0.0, 0.0, 1.0]).len() == 3);
    }
    #[test]
    fn take_due_picks_the_nearest_step() {
        let mut s = stream(vec![0.1, 0.201, 0.27, 0.3]);
        // 0.1 is nearer to 0.1 than to 0.2
        assert!(s.take_due(0.0, Some(0.1), 1e-6).is_none());
        assert_eq!(s.take_due(0.1, Some(0.2), 1e-6).unwrap().timestamp, 0.1);
        assert!(s.take_due(0.1, Some(0.2), 1e-6).is_none());
        // 0.201 lands just after the step at 0.2
        assert_eq!(s.take_due(0.2, Some(0.3), 1e-6).unwrap().timestamp, 0.201);
        assert!(s.take_due(0.2, Some(0.3), 1e-6).is_none());
        assert_eq!(s.cursor(), 2);
        // 0.27 and 0.3 both belong to the last step
        assert_eq!(s.take_due(0.3, None, 1e-6).unwrap().timestamp, 0.27);
        assert_eq!(s.take_due(0.3, None, 1e-6).unwrap().timestamp, 0.3);
        assert_eq!(s.remaining(), 0);
        s.reset();
        assert_eq!(s.remaining(), 4);
    }
    #[test]
    fn halfway_fix_goes_to_the_earlier_step() {
        let mut s = stream(vec![1.5]);
        assert!(s.take_due(1.0, Some(2.0), 1e-6).is_some());
    }
    #[test]
    fn fixes_outside_the_inertial_record_are_dropped() {
        let mut s = stream(vec![0.05, 0.15, 0.2, 0.9, 1.2]);
        assert_eq!(s.skip_stale(0.2, 1e-6), 2);
        assert_eq!(s.cursor(), 2);
        assert_eq!(s.take_due(0.2, Some(0.3), 1e-6).unwrap().timestamp, 0.2);
        assert_eq!(s.skip_stale(0.0, 1e-6), 0);
        // Last step at 1.0: 0.9 is applied, 1.2 is past the end of the record
        assert_eq!(s.take_due(1.0, None, 1e-6).unwrap().timestamp, 0.9);
        assert!(s.take_due(1.0, None, 1e-6).is_none());
        assert_eq!(s.discard_remaining(1.0), 1);
        assert_eq!(s.remaining(), 0);
        assert_eq!(s.discard_remaining(1.0), 0);
    }
    #[test]
    fn simultaneous_measurements_are_all_due() {
        let mut s = stream(vec![0.5, 0.5]);
        assert!(s.take_due(0.5, Some(0.6), 1e-6).is_some());
        assert!(s.take_due(0.5, Some(0.6), 1e-6).is_some());
        assert!(s.take_due(0.5, Some(0.6), 1e-6).is_none());
    }
    #[test]
    fn stream_fixes_use_configured_noise() {
        assert!(stream(vec![0.0, 1.0]).measurements().iter().all(|m| m.noise.is_none()));
    }
}
