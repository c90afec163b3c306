use serde::{Deserialize, Serialize};

/// Vector de tres componentes en doble precisión
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Norma euclídea
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Una muestra del sensor tal como llega del reloj
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Segundos en el reloj monotónico del sensor
    pub timestamp: f64,
    /// Aceleración del usuario (sin gravedad)
    pub acceleration: Vector3,
    /// Velocidad angular en rad/s
    pub rotation_rate: Vector3,
    /// Vector de gravedad (aprox. unitario)
    pub gravity: Vector3,
}

impl MotionSample {
    pub fn new(timestamp: f64, acceleration: Vector3, rotation_rate: Vector3, gravity: Vector3) -> Self {
        Self {
            timestamp,
            acceleration,
            rotation_rate,
            gravity,
        }
    }

    /// Crea una muestra desde una fila plana
    /// [t, ax, ay, az, gx, gy, gz, grx, gry, grz]
    pub fn from_row(row: &[f64; SAMPLE_STRIDE]) -> Self {
        Self {
            timestamp: row[0],
            acceleration: Vector3::new(row[1], row[2], row[3]),
            rotation_rate: Vector3::new(row[4], row[5], row[6]),
            gravity: Vector3::new(row[7], row[8], row[9]),
        }
    }

    /// Inverso de `from_row`
    pub fn to_row(&self) -> [f64; SAMPLE_STRIDE] {
        [
            self.timestamp,
            self.acceleration.x,
            self.acceleration.y,
            self.acceleration.z,
            self.rotation_rate.x,
            self.rotation_rate.y,
            self.rotation_rate.z,
            self.gravity.x,
            self.gravity.y,
            self.gravity.z,
        ]
    }
}

/// Muestra procesada: vectores crudos, magnitudes, orientación y
/// sus versiones filtradas (paso bajo)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessedMotion {
    pub timestamp: f64,

    pub acceleration: Vector3,
    pub rotation_rate: Vector3,
    pub gravity: Vector3,

    pub acc_magnitude: f64,
    pub gyro_magnitude: f64,
    /// Radianes, desde la gravedad
    pub pitch: f64,
    pub roll: f64,

    pub acc_magnitude_lp: f64,
    pub gyro_magnitude_lp: f64,
    pub pitch_lp: f64,
    pub roll_lp: f64,
}

impl ProcessedMotion {
    /// Canales que recibe el clasificador por muestra:
    /// [ax, ay, az, gx, gy, gz, grx, gry, grz]
    pub fn to_channels(&self, output: &mut [f32]) {
        output[0] = self.acceleration.x as f32;
        output[1] = self.acceleration.y as f32;
        output[2] = self.acceleration.z as f32;
        output[3] = self.rotation_rate.x as f32;
        output[4] = self.rotation_rate.y as f32;
        output[5] = self.rotation_rate.z as f32;
        output[6] = self.gravity.x as f32;
        output[7] = self.gravity.y as f32;
        output[8] = self.gravity.z as f32;
    }
}

/// Constantes del sistema
pub const DEFAULT_TARGET_HZ: f64 = 50.0;
pub const LIVE_TARGET_HZ: f64 = 100.0;
pub const CLASSIFIER_WINDOW: usize = 200;
pub const CLASSIFIER_STRIDE: usize = 25;
pub const CLASSIFIER_CHANNELS: usize = 9;
/// Valores por muestra en un lote plano
pub const SAMPLE_STRIDE: usize = 10;
pub const IDLE_LABEL: &str = "idle";
/// dt mínimo para los filtros EMA
pub const MIN_DT: f64 = 1e-6;
