#![allow(unused_macros)]

#[cfg(feature = "defmt")]
macro_rules! trace {
    ($($x:tt)*) => { ::defmt::trace!($($x)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {{ let _ = ($( & $x ),*); }};
}

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($x:tt)*) => { ::defmt::debug!($($x)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {{ let _ = ($( & $x ),*); }};
}

#[cfg(feature = "defmt")]
macro_rules! info {
    ($($x:tt)*) => { ::defmt::info!($($x)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {{ let _ = ($( & $x ),*); }};
}

#[cfg(feature = "defmt")]
macro_rules! warn {
    ($($x:tt)*) => { ::defmt::warn!($($x)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {{ let _ = ($( & $x ),*); }};
}

#[cfg(feature = "defmt")]
macro_rules! error {
    ($($x:tt)*) => { ::defmt::error!($($x)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {{ let _ = ($( & $x ),*); }};
}
