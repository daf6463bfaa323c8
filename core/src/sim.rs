//! Run drivers and synthetic scenarios.
//!
//! This module provides:
//! - [`run_closed_loop`]: predict through an inertial stream and apply every GNSS/LiDAR fix at
//!   the step nearest to it, skipping (and reporting) updates that cannot be computed
//! - [`dead_reckoning`]: prediction only
//! - [`RunReport`]: per-sensor counts of applied, skipped, and dropped measurements
//! - [`Scenario`]: a seeded generator of ground truth with matching inertial and position
//!   streams for tests and offline experiments

use std::collections::BTreeMap;

use log::{debug, info, warn};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};
use crate::health::HealthMonitor;
use crate::kalman::ErrorStateKalmanFilter;
use crate::measurements::{PositionMeasurement, Sensor};
use crate::messages::{ImuSample, ImuStream, MeasurementStream};
use crate::{ImuData, NavigationState, forward};

/// A measurement update that was skipped because it could not be computed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedUpdate {
    /// Filter step the measurement was associated with
    pub step: usize,
    pub sensor: Sensor,
    /// Measurement time in seconds
    pub timestamp: f64,
    pub reason: String,
}

/// Summary of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Number of prediction steps taken
    pub steps: usize,
    /// Applied measurement updates per sensor
    pub applied: BTreeMap<Sensor, usize>,
    /// Measurements outside the inertial time span, per sensor
    pub dropped: BTreeMap<Sensor, usize>,
    /// Updates skipped for numerical reasons, in the order they occurred
    pub skipped: Vec<SkippedUpdate>,
}
impl RunReport {
    pub fn applied(&self, sensor: Sensor) -> usize {
        self.applied.get(&sensor).copied().unwrap_or(0)
    }
    pub fn dropped(&self, sensor: Sensor) -> usize {
        self.dropped.get(&sensor).copied().unwrap_or(0)
    }
    pub fn skipped_for(&self, sensor: Sensor) -> impl Iterator<Item = &SkippedUpdate> + '_ {
        self.skipped.iter().filter(move |s| s.sensor == sensor)
    }
}

/// Closed-loop filtering over an inertial stream with absolute-position aiding.
///
/// For every inertial step `k = 1..n` the filter predicts with sample `k-1` over
/// `dt = t_k - t_{k-1}`, then applies every fix whose nearest inertial timestamp is `t_k`
/// (a fix exactly halfway between two steps goes to the earlier one). Fixes before the first
/// inertial timestamp or after the last, by more than the association tolerance, are dropped
/// and counted in [`RunReport::dropped`]. Streams are processed in ascending [`Sensor`] order,
/// so when GNSS and LiDAR fixes land on the same step GNSS is applied first and LiDAR sees the
/// covariance it left behind; the order of `streams` itself is left as given. Fixes nearest
/// the initial time are applied to the initial state. The filter state and covariance are
/// health-checked after every step.
///
/// # Errors
///
/// * [`FilterError::MalformedStream`] if the filter time does not match the first inertial
///   timestamp
/// * [`FilterError::NonPositiveTimeStep`] if consecutive inertial timestamps do not increase
/// * [`FilterError::Divergence`] if a health check fails
///
/// Singular or non-finite updates do not halt the run; they are logged and listed in
/// [`RunReport::skipped`].
pub fn run_closed_loop(
    filter: &mut ErrorStateKalmanFilter,
    imu: &ImuStream,
    streams: &mut [MeasurementStream],
) -> Result<RunReport> {
    let tolerance = filter.config().association_tolerance;
    let samples = imu.samples();
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(FilterError::MalformedStream(
                "inertial stream is empty".into(),
            ));
        }
    };
    if (first.timestamp - filter.time()).abs() > tolerance {
        return Err(FilterError::MalformedStream(format!(
            "filter starts at t = {} s but the inertial stream starts at t = {} s",
            filter.time(),
            first.timestamp
        )));
    }
    let mut order: Vec<usize> = (0..streams.len()).collect();
    order.sort_by_key(|&i| streams[i].sensor());
    let monitor = HealthMonitor::new(filter.config().health);
    let mut report = RunReport::default();
    info!(
        "closed loop: {} inertial samples, {} measurements in {} streams",
        samples.len(),
        streams.iter().map(|s| s.remaining()).sum::<usize>(),
        streams.len()
    );

    for stream in streams.iter_mut() {
        let dropped = stream.skip_stale(first.timestamp, tolerance);
        if dropped > 0 {
            *report.dropped.entry(stream.sensor()).or_default() += dropped;
        }
    }
    let next_time = samples.get(1).map(|s| s.timestamp);
    apply_due_measurements(filter, streams, &order, next_time, tolerance, &mut report)?;
    monitor.check(filter.step(), filter.state(), filter.covariance())?;

    for (k, pair) in samples.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        let step = k + 1;
        let dt = current.timestamp - previous.timestamp;
        if !(dt > 0.0) {
            return Err(FilterError::NonPositiveTimeStep { step, dt });
        }
        filter.predict_to(&previous.data, current.timestamp)?;
        let next_time = samples.get(step + 1).map(|s| s.timestamp);
        apply_due_measurements(filter, streams, &order, next_time, tolerance, &mut report)?;
        monitor.check(filter.step(), filter.state(), filter.covariance())?;
        report.steps += 1;
    }

    for stream in streams.iter_mut() {
        let dropped = stream.discard_remaining(last.timestamp);
        if dropped > 0 {
            *report.dropped.entry(stream.sensor()).or_default() += dropped;
        }
    }
    info!(
        "closed loop finished after {} steps: {} GNSS and {} LiDAR updates applied, {} skipped, {} dropped",
        report.steps,
        report.applied(Sensor::Gnss),
        report.applied(Sensor::Lidar),
        report.skipped.len(),
        report.dropped.values().sum::<usize>()
    );
    Ok(report)
}

/// Prediction only over an inertial stream.
///
/// Equivalent to [`run_closed_loop`] with no measurement streams.
pub fn dead_reckoning(
    filter: &mut ErrorStateKalmanFilter,
    imu: &ImuStream,
) -> Result<RunReport> {
    run_closed_loop(filter, imu, &mut [])
}

fn apply_due_measurements(
    filter: &mut ErrorStateKalmanFilter,
    streams: &mut [MeasurementStream],
    order: &[usize],
    next_time: Option<f64>,
    tolerance: f64,
    report: &mut RunReport,
) -> Result<()> {
    let time = filter.time();
    let step = filter.step();
    for &i in order {
        let stream = &mut streams[i];
        let sensor = stream.sensor();
        while let Some(measurement) = stream.take_due(time, next_time, tolerance) {
            debug!("step {step}: applying {measurement}");
            match filter.update(&measurement) {
                Ok(_) => *report.applied.entry(sensor).or_default() += 1,
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "step {step}: skipping {sensor} update at t = {:.6} s: {e}",
                        measurement.timestamp
                    );
                    report.skipped.push(SkippedUpdate {
                        step,
                        sensor,
                        timestamp: measurement.timestamp,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Fix schedule and noise for one position sensor.
///
/// Generated fixes carry no variance of their own; the filter weights them with the variance
/// configured for the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixSchedule {
    /// Emit a fix every `every` inertial steps, starting at step 0; `0` disables the sensor
    pub every: usize,
    /// Standard deviation of the Gaussian noise added to the true position (m)
    pub noise_std: f64,
}
impl FixSchedule {
    pub const fn disabled() -> Self {
        FixSchedule {
            every: 0,
            noise_std: 0.0,
        }
    }
}

/// Synthetic constant specific-force, constant angular-rate scenario.
///
/// Ground truth is propagated with the same mechanization the filter uses, from the noise-free
/// inertial samples. The inertial stream handed to the filter is the truth plus an optional
/// constant bias and seeded white noise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Number of inertial samples (steps + 1)
    pub samples: usize,
    /// Sample interval in seconds
    pub dt: f64,
    pub initial_position: Vector3<f64>,
    pub initial_velocity: Vector3<f64>,
    /// Roll, pitch, yaw in radians
    pub initial_euler: Vector3<f64>,
    /// True specific force in the body frame (m/s²)
    pub specific_force: Vector3<f64>,
    /// True angular rate in the body frame (rad/s)
    pub angular_rate: Vector3<f64>,
    pub gravity: Vector3<f64>,
    /// Constant error added to the reported specific force
    pub accel_bias: Vector3<f64>,
    pub accel_noise_std: f64,
    pub gyro_noise_std: f64,
    pub gnss: FixSchedule,
    pub lidar: FixSchedule,
    pub seed: u64,
}
impl Default for Scenario {
    fn default() -> Self {
        Scenario {
            samples: 101,
            dt: 0.1,
            initial_position: Vector3::zeros(),
            initial_velocity: Vector3::new(1.0, 0.0, 0.0),
            initial_euler: Vector3::zeros(),
            specific_force: Vector3::new(0.0, 0.0, 9.81),
            angular_rate: Vector3::zeros(),
            gravity: Vector3::from(crate::GRAVITY),
            accel_bias: Vector3::zeros(),
            accel_noise_std: 0.0,
            gyro_noise_std: 0.0,
            gnss: FixSchedule {
                every: 10,
                noise_std: 0.0,
            },
            lidar: FixSchedule::disabled(),
            seed: 42,
        }
    }
}

/// Output of [`Scenario::generate`]
#[derive(Clone, Debug)]
pub struct ScenarioData {
    pub timestamps: Vec<f64>,
    /// True state at every inertial timestamp
    pub truth: Vec<NavigationState>,
    pub imu: ImuStream,
    pub gnss: MeasurementStream,
    pub lidar: MeasurementStream,
}
impl ScenarioData {
    pub fn initial_state(&self) -> NavigationState {
        self.truth.first().copied().unwrap_or_default()
    }
    /// Both position streams, ready for [`run_closed_loop`]
    pub fn streams(&self) -> Vec<MeasurementStream> {
        vec![self.gnss.clone(), self.lidar.clone()]
    }
}

impl Scenario {
    pub fn generate(&self) -> Result<ScenarioData> {
        if self.samples == 0 || !(self.dt > 0.0) || !self.dt.is_finite() {
            return Err(FilterError::Config(format!(
                "scenario needs at least one sample and a positive dt, got {} samples, dt = {}",
                self.samples, self.dt
            )));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let accel_noise = gaussian(self.accel_noise_std)?;
        let gyro_noise = gaussian(self.gyro_noise_std)?;
        let gnss_noise = gaussian(self.gnss.noise_std)?;
        let lidar_noise = gaussian(self.lidar.noise_std)?;

        let clean = ImuData::new(self.specific_force, self.angular_rate);
        let mut timestamps = Vec::with_capacity(self.samples);
        let mut truth = Vec::with_capacity(self.samples);
        let mut samples = Vec::with_capacity(self.samples);
        let mut gnss = Vec::new();
        let mut lidar = Vec::new();

        let mut state = NavigationState::from_euler(
            self.initial_position,
            self.initial_velocity,
            self.initial_euler[0],
            self.initial_euler[1],
            self.initial_euler[2],
        );
        let mut previous_t = 0.0;
        for k in 0..self.samples {
            let t = k as f64 * self.dt;
            if k > 0 {
                // integrate over the stamped interval so truth lines up with the stream
                state = forward(&state, &clean, &self.gravity, t - previous_t);
                state.orientation = state.orientation.normalize();
            }
            previous_t = t;
            timestamps.push(t);
            truth.push(state);
            samples.push(ImuSample {
                timestamp: t,
                data: ImuData::new(
                    clean.accel + self.accel_bias + sample(&accel_noise, &mut rng),
                    clean.gyro + sample(&gyro_noise, &mut rng),
                ),
            });
            if self.gnss.every > 0 && k % self.gnss.every == 0 {
                gnss.push(PositionMeasurement::new(
                    Sensor::Gnss,
                    t,
                    state.position + sample(&gnss_noise, &mut rng),
                ));
            }
            if self.lidar.every > 0 && k % self.lidar.every == 0 {
                lidar.push(PositionMeasurement::new(
                    Sensor::Lidar,
                    t,
                    state.position + sample(&lidar_noise, &mut rng),
                ));
            }
        }
        Ok(ScenarioData {
            timestamps,
            truth,
            imu: ImuStream::from_samples(samples)?,
            gnss: MeasurementStream::from_measurements(Sensor::Gnss, gnss)?,
            lidar: MeasurementStream::from_measurements(Sensor::Lidar, lidar)?,
        })
    }
}

/// Zero-mean normal distribution, or `None` for a noise-free channel
fn gaussian(std: f64) -> Result<Option<Normal<f64>>> {
    if std == 0.0 {
        return Ok(None);
    }
    Normal::new(0.0, std)
        .map(Some)
        .map_err(|e| FilterError::Config(format!("invalid noise standard deviation {std}: {e}")))
}

fn sample(distribution: &Option<Normal<f64>>, rng: &mut StdRng) -> Vector3<f64> {
    match distribution {
        Some(normal) => Vector3::new(
            normal.sample(rng),
            normal.sample(rng),
            normal.sample(rng),
        ),
        None => Vector3::zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttitudeCoupling, FilterConfig, ImuNoise};
    use crate::linalg::Matrix9;

    fn filter_at(state: NavigationState, covariance: Matrix9) -> ErrorStateKalmanFilter {
        ErrorStateKalmanFilter::new(FilterConfig::default(), state, covariance, 0.0).unwrap()
    }

    #[test]
    fn scenario_is_reproducible() {
        let scenario = Scenario {
            accel_noise_std: 0.1,
            gyro_noise_std: 0.01,
            gnss: FixSchedule {
                every: 5,
                noise_std: 1.0,
            },
            ..Default::default()
        };
        let a = scenario.generate().unwrap();
        let b = scenario.generate().unwrap();
        assert_eq!(a.imu, b.imu);
        assert_eq!(a.gnss, b.gnss);
        assert_eq!(a.truth.len(), 101);
        assert_eq!(a.gnss.len(), 21);
        assert!(a.lidar.is_empty());
        let c = Scenario { seed: 7, ..scenario }.generate().unwrap();
        assert_ne!(a.imu, c.imu);
    }
    #[test]
    fn scenario_truth_follows_constant_velocity() {
        let data = Scenario::default().generate().unwrap();
        let last = data.truth.last().unwrap();
        assert!((last.position[0] - 10.0).abs() < 1e-9);
        assert_eq!(last.velocity, Vector3::new(1.0, 0.0, 0.0));
    }
    #[test]
    fn scenario_rejects_bad_parameters() {
        let bad_dt = Scenario {
            dt: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad_dt.generate(), Err(FilterError::Config(_))));
        let bad_noise = Scenario {
            accel_noise_std: -1.0,
            ..Default::default()
        };
        assert!(bad_noise.generate().is_err());
    }
    #[test]
    fn dead_reckoning_takes_every_step() {
        let data = Scenario::default().generate().unwrap();
        let mut filter = filter_at(data.initial_state(), Matrix9::zeros());
        let report = dead_reckoning(&mut filter, &data.imu).unwrap();
        assert_eq!(report.steps, 100);
        assert_eq!(filter.trajectory().len(), 101);
        assert_eq!(report.applied(Sensor::Gnss), 0);
        assert_eq!(filter.state().position, data.truth[100].position);
    }
    #[test]
    fn closed_loop_counts_updates() {
        let data = Scenario::default().generate().unwrap();
        let mut filter = filter_at(data.initial_state(), Matrix9::identity() * 0.01);
        let mut streams = data.streams();
        let report = run_closed_loop(&mut filter, &data.imu, &mut streams).unwrap();
        assert_eq!(report.applied(Sensor::Gnss), 11);
        assert_eq!(report.applied(Sensor::Lidar), 0);
        assert!(report.skipped.is_empty());
        assert_eq!(streams[0].remaining(), 0);
    }
    #[test]
    fn misaligned_start_is_rejected() {
        let data = Scenario::default().generate().unwrap();
        let mut filter = ErrorStateKalmanFilter::new(
            FilterConfig::default(),
            data.initial_state(),
            Matrix9::zeros(),
            5.0,
        )
        .unwrap();
        let err = dead_reckoning(&mut filter, &data.imu).unwrap_err();
        assert!(matches!(err, FilterError::MalformedStream(_)));
    }
    #[test]
    fn fixes_are_applied_at_the_nearest_step() {
        let data = Scenario {
            samples: 11,
            gnss: FixSchedule::disabled(),
            ..Default::default()
        }
        .generate()
        .unwrap();
        // Inertial steps at k * 0.1 s for k = 0..=10
        let fixes = MeasurementStream::new(
            Sensor::Gnss,
            vec![-0.5, 0.201, 0.58, 0.6, 1.03, 1.3],
            vec![
                Vector3::new(-9.0, 0.0, 0.0),
                Vector3::new(0.3, 0.1, 0.0),
                Vector3::new(0.5, -0.1, 0.0),
                Vector3::new(0.7, 0.0, 0.1),
                Vector3::new(1.1, 0.0, 0.0),
                Vector3::new(9.0, 0.0, 0.0),
            ],
        )
        .unwrap();
        let mut filter = filter_at(data.initial_state(), Matrix9::identity());
        let mut streams = vec![fixes.clone()];
        let report = run_closed_loop(&mut filter, &data.imu, &mut streams).unwrap();
        assert_eq!(report.applied(Sensor::Gnss), 3);
        // One fix before the record and two after it
        assert_eq!(report.dropped(Sensor::Gnss), 3);
        assert_eq!(streams[0].remaining(), 0);

        // Same fixes applied by hand at steps 2 and 6
        let m = fixes.measurements();
        let mut manual = filter_at(data.initial_state(), Matrix9::identity());
        for (k, pair) in data.imu.samples().windows(2).enumerate() {
            manual.predict_to(&pair[0].data, pair[1].timestamp).unwrap();
            match k + 1 {
                2 => {
                    manual.update(&m[1]).unwrap();
                }
                6 => {
                    manual.update(&m[2]).unwrap();
                    manual.update(&m[3]).unwrap();
                }
                _ => {}
            }
        }
        assert_eq!(filter.trajectory(), manual.trajectory());
    }
    #[test]
    fn fix_just_past_the_last_step_is_applied() {
        let data = Scenario {
            samples: 11,
            gnss: FixSchedule::disabled(),
            ..Default::default()
        }
        .generate()
        .unwrap();
        let end = *data.timestamps.last().unwrap();
        let fixes = MeasurementStream::new(
            Sensor::Lidar,
            vec![end + 1e-7, end + 0.05],
            vec![Vector3::new(1.0, 0.0, 0.0); 2],
        )
        .unwrap();
        let mut filter = filter_at(data.initial_state(), Matrix9::identity());
        let report = run_closed_loop(&mut filter, &data.imu, &mut [fixes]).unwrap();
        assert_eq!(report.applied(Sensor::Lidar), 1);
        assert_eq!(report.dropped(Sensor::Lidar), 1);
    }
    #[test]
    fn configured_variance_changes_closed_loop() {
        let data = Scenario {
            gnss: FixSchedule {
                every: 5,
                noise_std: 0.5,
            },
            ..Default::default()
        }
        .generate()
        .unwrap();
        let run = |gnss_variance: f64| {
            let config = FilterConfig {
                gnss_variance,
                attitude_coupling: AttitudeCoupling::Omitted,
                imu: ImuNoise {
                    accel_variance: 1e-4,
                    gyro_variance: 1e-6,
                },
                ..Default::default()
            };
            let initial_covariance = Matrix9::identity() * 0.01;
            let mut filter =
                ErrorStateKalmanFilter::new(config, data.initial_state(), initial_covariance, 0.0)
                    .unwrap();
            let report = run_closed_loop(&mut filter, &data.imu, &mut data.streams()).unwrap();
            assert_eq!(report.applied(Sensor::Gnss), 21);
            filter
        };
        let trusting = run(0.1);
        let doubtful = run(1e6);
        assert_ne!(trusting.state(), doubtful.state());
        // Noise-free inertial data: dead reckoning is ground truth
        let truth = data.truth.last().unwrap().position;
        let shift = (doubtful.state().position - truth).norm();
        let pull = (trusting.state().position - truth).norm();
        assert!(shift < 1e-2 * pull, "shift {shift}, pull {pull}");
    }
}
