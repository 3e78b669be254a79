use byteorder::{BigEndian, ByteOrder};

use crate::banks::BankSet;
use crate::frame::crc16;
use crate::types::{exception, fc, pos, Error};

fn check_crc(frame: &[u8]) -> Result<(), Error> {
    let split = frame.len() - 2;
    let wire = BigEndian::read_u16(&frame[split..]);
    if crc16(&frame[..split]) != wire {
        return Err(Error::BadCrc);
    }
    Ok(())
}

/// Validate an incoming request against the configured banks: CRC,
/// function-code membership, then the address/quantity ranges keyed by
/// function code. Absent banks report zero words, so any access to them
/// fails the range check before any bank arithmetic happens.
pub(crate) fn validate_request(frame: &[u8], banks: &BankSet) -> Result<(), Error> {
    check_crc(frame)?;

    let function = frame[pos::FUNC];
    if !fc::SUPPORTED.contains(&function) {
        return Err(Error::Exception(exception::ILLEGAL_FUNCTION));
    }

    let address = u32::from(BigEndian::read_u16(&frame[pos::ADD_HI..]));
    let quantity = u32::from(BigEndian::read_u16(&frame[pos::NB_HI..]));

    match function {
        fc::READ_COILS | fc::READ_DISCRETE_INPUTS | fc::WRITE_MULTIPLE_COILS => {
            let words = if function == fc::READ_DISCRETE_INPUTS {
                banks.discrete_words()
            } else {
                banks.coil_words()
            };
            if quantity == 0 {
                return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
            }
            let first = address / 16;
            let span = quantity / 16 + u32::from(quantity % 16 != 0);
            if first + span > u32::from(words) {
                return Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS));
            }
            let response = quantity / 8 + u32::from(quantity % 8 != 0) + 5;
            if response > 256 {
                return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
            }
            if function == fc::WRITE_MULTIPLE_COILS {
                // the announced payload must actually be in the frame
                let byte_count = (quantity + 7) / 8;
                if 9 + byte_count > frame.len() as u32 {
                    return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
                }
            }
        }
        fc::WRITE_SINGLE_COIL => {
            if address / 16 + 1 > u32::from(banks.coil_words()) {
                return Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS));
            }
        }
        fc::WRITE_SINGLE_REGISTER => {
            if address >= u32::from(banks.holding_words()) {
                return Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS));
            }
        }
        fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS | fc::WRITE_MULTIPLE_REGISTERS => {
            let words = if function == fc::READ_INPUT_REGISTERS {
                banks.input_words()
            } else {
                banks.holding_words()
            };
            if quantity == 0 {
                return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
            }
            if address + quantity > u32::from(words) {
                return Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS));
            }
            let response = quantity * 2 + 5;
            if response > 256 {
                return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
            }
            if function == fc::WRITE_MULTIPLE_REGISTERS && 9 + quantity * 2 > frame.len() as u32 {
                return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validate a response on the master side: CRC, exception flag, then
/// function-code membership.
pub(crate) fn validate_answer(frame: &[u8]) -> Result<(), Error> {
    check_crc(frame)?;

    let function = frame[pos::FUNC];
    if function & 0x80 != 0 {
        return Err(Error::Exception(frame[2]));
    }
    if !fc::SUPPORTED.contains(&function) {
        return Err(Error::Exception(exception::ILLEGAL_FUNCTION));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::with_crc;

    fn request(function: u8, address: u16, quantity: u16) -> Vec<u8> {
        with_crc(&[
            0x11,
            function,
            (address >> 8) as u8,
            address as u8,
            (quantity >> 8) as u8,
            quantity as u8,
        ])
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let mut holding = [0u16; 8];
        let banks = BankSet::new().holding(&mut holding);
        let mut frame = request(fc::READ_HOLDING_REGISTERS, 0, 1);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(validate_request(&frame, &banks), Err(Error::BadCrc));
    }

    #[test]
    fn unsupported_function_is_rejected() {
        let banks = BankSet::new();
        let frame = request(0x07, 0, 0);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_FUNCTION))
        );
    }

    #[test]
    fn word_reads_one_past_the_bank_fail() {
        let mut holding = [0u16; 16];
        let mut input = [0u16; 4];
        let banks = BankSet::new().holding(&mut holding).input(&mut input);

        let frame = request(fc::READ_HOLDING_REGISTERS, 0, 16);
        assert_eq!(validate_request(&frame, &banks), Ok(()));
        let frame = request(fc::READ_HOLDING_REGISTERS, 1, 16);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );

        let frame = request(fc::READ_INPUT_REGISTERS, 4, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );

        let frame = request(fc::WRITE_SINGLE_REGISTER, 16, 0x1234);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
        let frame = request(fc::WRITE_SINGLE_REGISTER, 15, 0x1234);
        assert_eq!(validate_request(&frame, &banks), Ok(()));
    }

    #[test]
    fn bit_reads_one_past_the_bank_fail() {
        let mut holding = [0u16; 1];
        let mut coils = [0u16; 2];
        let mut discrete = [0u16; 1];
        let banks = BankSet::new()
            .holding(&mut holding)
            .coils(&mut coils)
            .discrete(&mut discrete);

        // 2 words of coils = 32 bits
        let frame = request(fc::READ_COILS, 0, 32);
        assert_eq!(validate_request(&frame, &banks), Ok(()));
        let frame = request(fc::READ_COILS, 32, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );

        let frame = request(fc::READ_DISCRETE_INPUTS, 16, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
        let frame = request(fc::READ_DISCRETE_INPUTS, 0, 16);
        assert_eq!(validate_request(&frame, &banks), Ok(()));

        // the multi-write range checks fire before the payload check
        let frame = request(fc::WRITE_MULTIPLE_COILS, 32, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
        let frame = request(fc::WRITE_MULTIPLE_REGISTERS, 1, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
    }

    #[test]
    fn single_coil_write_boundary() {
        let mut holding = [0u16; 1];
        let mut coils = [0u16; 2];
        let banks = BankSet::new().holding(&mut holding).coils(&mut coils);

        let frame = request(fc::WRITE_SINGLE_COIL, 31, 0xFF00);
        assert_eq!(validate_request(&frame, &banks), Ok(()));
        // first coil of the word one past the end
        let frame = request(fc::WRITE_SINGLE_COIL, 32, 0xFF00);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
    }

    #[test]
    fn absent_banks_short_circuit() {
        let mut holding = [0u16; 4];
        let banks = BankSet::new().holding(&mut holding);

        let frame = request(fc::READ_COILS, 0, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
        let frame = request(fc::READ_DISCRETE_INPUTS, 0, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
        let frame = request(fc::READ_INPUT_REGISTERS, 0, 1);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );
    }

    #[test]
    fn zero_quantity_is_a_value_error() {
        let mut holding = [0u16; 4];
        let mut coils = [0u16; 4];
        let banks = BankSet::new().holding(&mut holding).coils(&mut coils);

        for function in [
            fc::READ_COILS,
            fc::READ_HOLDING_REGISTERS,
            fc::WRITE_MULTIPLE_REGISTERS,
        ] {
            let frame = request(function, 0, 0);
            assert_eq!(
                validate_request(&frame, &banks),
                Err(Error::Exception(exception::ILLEGAL_DATA_VALUE)),
                "function {function:#04x}"
            );
        }
    }

    #[test]
    fn oversized_read_is_a_value_error() {
        let mut holding = [0u16; 256];
        let banks = BankSet::new().holding(&mut holding);
        // 126 words would need a 257-byte response
        let frame = request(fc::READ_HOLDING_REGISTERS, 0, 126);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_VALUE))
        );
        let frame = request(fc::READ_HOLDING_REGISTERS, 0, 125);
        assert_eq!(validate_request(&frame, &banks), Ok(()));
    }

    #[test]
    fn truncated_multi_write_is_a_value_error() {
        let mut holding = [0u16; 8];
        let banks = BankSet::new().holding(&mut holding);
        // announces two registers but carries none
        let frame = request(fc::WRITE_MULTIPLE_REGISTERS, 0, 2);
        assert_eq!(
            validate_request(&frame, &banks),
            Err(Error::Exception(exception::ILLEGAL_DATA_VALUE))
        );

        let frame = with_crc(&[
            0x11, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02,
        ]);
        assert_eq!(validate_request(&frame, &banks), Ok(()));
    }

    #[test]
    fn answer_validation() {
        let frame = with_crc(&[0x11, 0x03, 0x02, 0x00, 0x2A]);
        assert_eq!(validate_answer(&frame), Ok(()));

        let mut bad = frame.clone();
        bad[2] ^= 0x01;
        assert_eq!(validate_answer(&bad), Err(Error::BadCrc));

        // exception response surfaces the carried code
        let frame = with_crc(&[0x11, 0x83, 0x02, 0x00]);
        assert_eq!(
            validate_answer(&frame),
            Err(Error::Exception(exception::ILLEGAL_DATA_ADDRESS))
        );

        let frame = with_crc(&[0x11, 0x07, 0x00, 0x00]);
        assert_eq!(
            validate_answer(&frame),
            Err(Error::Exception(exception::ILLEGAL_FUNCTION))
        );
    }
}
