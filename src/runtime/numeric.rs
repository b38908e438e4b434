//! Fixed-width integer arithmetic with two's-complement wrapping.
//!
//! Values travel as `i64` and are normalised to the range of their type after
//! every operation, the way compiled code truncates after each instruction.

use super::trap::Trap;

/// The integer types with wrapping semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntType {
    /// 8-bit signed
    Byte,
    /// 16-bit signed
    Short,
    /// 16-bit unsigned
    Char,
    /// 32-bit signed
    Int,
    /// 64-bit signed
    Long,
}

impl IntType {
    pub fn bits(self) -> u32 {
        match self {
            IntType::Byte => 8,
            IntType::Short | IntType::Char => 16,
            IntType::Int => 32,
            IntType::Long => 64,
        }
    }

    pub fn min_value(self) -> i64 {
        match self {
            IntType::Byte => i8::MIN as i64,
            IntType::Short => i16::MIN as i64,
            IntType::Char => 0,
            IntType::Int => i32::MIN as i64,
            IntType::Long => i64::MIN,
        }
    }

    pub fn max_value(self) -> i64 {
        match self {
            IntType::Byte => i8::MAX as i64,
            IntType::Short => i16::MAX as i64,
            IntType::Char => u16::MAX as i64,
            IntType::Int => i32::MAX as i64,
            IntType::Long => i64::MAX,
        }
    }

    /// Truncate `value` to this type's width.
    pub fn wrap(self, value: i64) -> i64 {
        match self {
            IntType::Byte => value as i8 as i64,
            IntType::Short => value as i16 as i64,
            IntType::Char => value as u16 as i64,
            IntType::Int => value as i32 as i64,
            IntType::Long => value,
        }
    }

    pub fn add(self, a: i64, b: i64) -> i64 {
        self.wrap(a.wrapping_add(b))
    }

    pub fn sub(self, a: i64, b: i64) -> i64 {
        self.wrap(a.wrapping_sub(b))
    }

    pub fn mul(self, a: i64, b: i64) -> i64 {
        self.wrap(a.wrapping_mul(b))
    }

    pub fn neg(self, a: i64) -> i64 {
        self.wrap(a.wrapping_neg())
    }

    /// Truncating division. `MIN / -1` wraps back to `MIN`.
    pub fn div(self, a: i64, b: i64) -> Result<i64, Trap> {
        if self.wrap(b) == 0 {
            return Err(Trap::DivisionByZero);
        }
        Ok(self.wrap(self.wrap(a).wrapping_div(self.wrap(b))))
    }

    /// Remainder with the sign of the dividend.
    pub fn rem(self, a: i64, b: i64) -> Result<i64, Trap> {
        if self.wrap(b) == 0 {
            return Err(Trap::DivisionByZero);
        }
        Ok(self.wrap(self.wrap(a).wrapping_rem(self.wrap(b))))
    }
}

/// IEEE-754 division; dividing by zero yields an infinity or NaN.
pub fn div_f64(a: f64, b: f64) -> f64 {
    a / b
}

pub fn div_f32(a: f32, b: f32) -> f32 {
    a / b
}

/// IEEE-754 remainder with the sign of the dividend; a zero divisor yields NaN.
pub fn rem_f64(a: f64, b: f64) -> f64 {
    a % b
}

pub fn rem_f32(a: f32, b: f32) -> f32 {
    a % b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_wrapping() {
        assert_eq!(IntType::Byte.add(127, 1), -128);
        assert_eq!(IntType::Byte.sub(-128, 1), 127);
        assert_eq!(IntType::Byte.mul(64, 2), -128);
        assert_eq!(IntType::Byte.neg(-128), -128);
    }

    #[test]
    fn test_char_wrapping() {
        assert_eq!(IntType::Char.add(65535, 1), 0);
        assert_eq!(IntType::Char.sub(0, 1), 65535);
    }

    #[test]
    fn test_short_wrapping() {
        assert_eq!(IntType::Short.add(32767, 1), -32768);
        assert_eq!(IntType::Short.sub(-32768, 1), 32767);
    }

    #[test]
    fn test_int_wrapping() {
        assert_eq!(IntType::Int.add(i32::MAX as i64, 1), i32::MIN as i64);
        assert_eq!(IntType::Int.sub(i32::MIN as i64, 1), i32::MAX as i64);
        assert_eq!(IntType::Int.mul(65536, 65536), 0);
    }

    #[test]
    fn test_long_wrapping() {
        assert_eq!(IntType::Long.add(i64::MAX, 1), i64::MIN);
        assert_eq!(IntType::Long.div(i64::MIN, -1), Ok(i64::MIN));
        assert_eq!(IntType::Long.rem(i64::MIN, -1), Ok(0));
    }

    #[test]
    fn test_division_by_zero_traps() {
        for ty in [
            IntType::Byte,
            IntType::Short,
            IntType::Char,
            IntType::Int,
            IntType::Long,
        ] {
            assert_eq!(ty.div(1, 0), Err(Trap::DivisionByZero));
            assert_eq!(ty.rem(1, 0), Err(Trap::DivisionByZero));
        }
        // 256 truncates to 0 as a byte divisor
        assert_eq!(IntType::Byte.div(1, 256), Err(Trap::DivisionByZero));
    }

    #[test]
    fn test_division_truncates() {
        assert_eq!(IntType::Int.div(-7, 2), Ok(-3));
        assert_eq!(IntType::Int.rem(-7, 2), Ok(-1));
        assert_eq!(IntType::Int.div(i32::MIN as i64, -1), Ok(i32::MIN as i64));
        assert_eq!(IntType::Byte.div(-128, -1), Ok(-128));
    }

    #[test]
    fn test_float_division_by_zero() {
        assert_eq!(div_f64(1.0, 0.0), f64::INFINITY);
        assert_eq!(div_f64(-1.0, 0.0), f64::NEG_INFINITY);
        assert!(div_f64(0.0, 0.0).is_nan());
        assert_eq!(div_f32(1.0, 0.0), f32::INFINITY);
        assert!(rem_f64(1.0, 0.0).is_nan());
        assert_eq!(rem_f64(-7.5, 2.0), -1.5);
        assert_eq!(rem_f32(7.0, 4.0), 3.0);
    }

    #[test]
    fn test_ranges() {
        assert_eq!(IntType::Char.min_value(), 0);
        assert_eq!(IntType::Char.max_value(), 65535);
        assert_eq!(IntType::Byte.bits(), 8);
        for ty in [IntType::Byte, IntType::Short, IntType::Char, IntType::Int] {
            assert_eq!(ty.wrap(ty.max_value() + 1), ty.min_value());
        }
    }
}
