use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

/// The four register banks of a station, owned by the host application.
///
/// A bank that is `None` is absent: requests addressing it are answered
/// with `ILLEGAL_DATA_ADDRESS`. Coils and discrete inputs are packed into
/// 16-bit words, bit `k % 16` of word `k / 16`.
pub struct BankSet<'a> {
    pub holding: Option<&'a mut [u16]>,
    pub input: Option<&'a mut [u16]>,
    pub coils: Option<&'a mut [u16]>,
    pub discrete: Option<&'a mut [u16]>,
}

/// Banks are shared between the engine and the host application. The mutex
/// is the transaction boundary: the host must hold it to get a view that is
/// consistent across one request.
pub type SharedBanks<'a> = Mutex<CriticalSectionRawMutex, BankSet<'a>>;

impl<'a> BankSet<'a> {
    pub const fn new() -> Self {
        BankSet {
            holding: None,
            input: None,
            coils: None,
            discrete: None,
        }
    }

    pub fn holding(mut self, regs: &'a mut [u16]) -> Self {
        self.holding = Some(regs);
        self
    }

    pub fn input(mut self, regs: &'a mut [u16]) -> Self {
        self.input = Some(regs);
        self
    }

    pub fn coils(mut self, regs: &'a mut [u16]) -> Self {
        self.coils = Some(regs);
        self
    }

    pub fn discrete(mut self, regs: &'a mut [u16]) -> Self {
        self.discrete = Some(regs);
        self
    }

    pub(crate) fn holding_words(&self) -> u16 {
        self.holding.as_deref().map_or(0, |r| r.len() as u16)
    }

    pub(crate) fn input_words(&self) -> u16 {
        self.input.as_deref().map_or(0, |r| r.len() as u16)
    }

    pub(crate) fn coil_words(&self) -> u16 {
        self.coils.as_deref().map_or(0, |r| r.len() as u16)
    }

    pub(crate) fn discrete_words(&self) -> u16 {
        self.discrete.as_deref().map_or(0, |r| r.len() as u16)
    }
}

impl<'a> Default for BankSet<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read coil `coil` from a packed bank.
pub fn coil_read(regs: &[u16], coil: usize) -> bool {
    (regs[coil / 16] >> (coil % 16)) & 1 != 0
}

/// Write coil `coil` in a packed bank.
pub fn coil_write(regs: &mut [u16], coil: usize, on: bool) {
    if on {
        regs[coil / 16] |= 1 << (coil % 16);
    } else {
        regs[coil / 16] &= !(1 << (coil % 16));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_banks_have_zero_words() {
        let banks = BankSet::new();
        assert_eq!(banks.holding_words(), 0);
        assert_eq!(banks.input_words(), 0);
        assert_eq!(banks.coil_words(), 0);
        assert_eq!(banks.discrete_words(), 0);
    }

    #[test]
    fn bank_sizes_follow_slices() {
        let mut holding = [0u16; 8];
        let mut coils = [0u16; 2];
        let banks = BankSet::new().holding(&mut holding).coils(&mut coils);
        assert_eq!(banks.holding_words(), 8);
        assert_eq!(banks.coil_words(), 2);
        assert_eq!(banks.input_words(), 0);
    }

    #[test]
    fn coil_bit_convention() {
        let mut regs = [0u16; 2];
        coil_write(&mut regs, 0, true);
        coil_write(&mut regs, 15, true);
        coil_write(&mut regs, 16, true);
        assert_eq!(regs, [0x8001, 0x0001]);

        assert!(coil_read(&regs, 0));
        assert!(coil_read(&regs, 15));
        assert!(coil_read(&regs, 16));
        assert!(!coil_read(&regs, 1));

        coil_write(&mut regs, 15, false);
        assert_eq!(regs[0], 0x0001);
    }
}
