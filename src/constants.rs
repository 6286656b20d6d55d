pub const SMALL_VALUE: f64 = 1e-6;
pub const BIG_VALUE: f64 = 1e8;
pub const TINY: f64 = 1e-6;
pub const RQ_TOL: f64 = 1e-7; // lower bound on a link's head loss gradient
pub const Q_ZERO: f64 = 1e-6; // flow treated as zero (cfs)

pub const PI: f64 = std::f64::consts::PI;
pub const GRAVITY: f64 = 32.2; // ft/s2

pub const HW_EXPONENT: f64 = 1.852; // Hazen-Williams flow exponent
pub const MINOR_LOSS_FACTOR: f64 = 0.02517; // 8/(g*pi^2), converts K to ft/cfs2 with d in ft
pub const HP_FACTOR: f64 = 8.814; // ft*cfs per horsepower for water
pub const KW_PER_HP: f64 = 0.7457;

pub const SEC_PER_DAY: i64 = 86_400;
pub const SEC_PER_HOUR: f64 = 3600.0;

pub const M_PER_FT: f64 = 0.3048;
pub const GPM_PER_CFS: f64 = 448.831;
pub const LPS_PER_CFS: f64 = 28.317;
pub const PSI_PER_FT: f64 = 0.4333;
