// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Integer division for generated code.
//!
//! Division by zero is fatal. Signed `MIN / -1` wraps instead of trapping.

use crate::error::{fatal, RuntimeError};

/// Integers generated code divides.
pub trait Integer: Copy {
    fn is_zero(self) -> bool;
    fn wrapping_quotient(self, rhs: Self) -> Self;
    fn wrapping_remainder(self, rhs: Self) -> Self;
}

macro_rules! impl_integer {
    ($($t:ty),*) => {$(
        impl Integer for $t {
            #[inline]
            fn is_zero(self) -> bool {
                self == 0
            }

            #[inline]
            fn wrapping_quotient(self, rhs: Self) -> Self {
                self.wrapping_div(rhs)
            }

            #[inline]
            fn wrapping_remainder(self, rhs: Self) -> Self {
                self.wrapping_rem(rhs)
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

/// `lhs / rhs`, fatal when `rhs` is zero.
#[inline]
#[track_caller]
pub fn div<T: Integer>(lhs: T, rhs: T) -> T {
    if rhs.is_zero() {
        fatal(RuntimeError::DivideByZero);
    }
    lhs.wrapping_quotient(rhs)
}

/// `lhs % rhs`, fatal when `rhs` is zero.
#[inline]
#[track_caller]
pub fn rem<T: Integer>(lhs: T, rhs: T) -> T {
    if rhs.is_zero() {
        fatal(RuntimeError::DivideByZero);
    }
    lhs.wrapping_remainder(rhs)
}
