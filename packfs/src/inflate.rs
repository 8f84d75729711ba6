//! A resumable raw DEFLATE ([RFC 1951]) decoder, optionally wrapped in a zlib
//! ([RFC 1950]) container.
//!
//! [`Decompressor`] owns no buffers. Each call to [`Decompressor::decompress`]
//! takes a slice of input and an output buffer with a write position, and runs
//! until one of:
//!
//! - the output buffer is full: [`Status::HasMoreOutput`]. Drain it and call
//!   again with a new write position.
//! - the input is exhausted: [`Status::NeedsMoreInput`]. Call again with the
//!   bytes that follow in the compressed stream.
//! - the final block ended: [`Status::Done`].
//!
//! Back-references read `position - distance` in the output buffer, so it is
//! addressed as a ring whose capacity must be a power of two, and at least the
//! stream window size (32KiB covers every stream). Alternatively, with
//! [`Flags::NON_WRAPPING_OUTPUT`], the output buffer holds the whole result.
//!
//! Any error is terminal. The same instance must not be reused afterwards,
//! except after [`Decompressor::reset`].
//!
//! [RFC 1951]: https://www.rfc-editor.org/rfc/rfc1951
//! [RFC 1950]: https://www.rfc-editor.org/rfc/rfc1950
use std::fmt;

/// Options for a [`Decompressor::decompress`] call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl_flags! {
    Flags(u8);

    /// Expect a zlib header and verify the trailing Adler-32 checksum.
    ZLIB = 1 << 0,
    /// More input follows the slice passed to this call.
    HAS_MORE_INPUT = 1 << 1,
    /// The output buffer holds the whole result and never wraps.
    NON_WRAPPING_OUTPUT = 1 << 2,
}

/// Why a [`Decompressor::decompress`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All input was consumed and more is required.
    NeedsMoreInput,
    /// The output buffer is full and there is more to produce.
    HasMoreOutput,
    /// The end of the final block (and the checksum, if any) is reached.
    Done,
}

/// The outcome of a successful [`Decompressor::decompress`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub status: Status,
    /// Bytes consumed from the input slice.
    pub consumed: usize,
    /// Bytes written to the output buffer, starting at the given position.
    pub produced: usize,
}

/// A decompression failure. All of these are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The caller passed an unusable buffer or position.
    InvalidParam(&'static str),
    /// The stream is malformed.
    Corrupt(&'static str),
    /// The input ended while more was required and no more was promised.
    UnexpectedEnd,
    /// The zlib trailer does not match the decompressed content.
    Adler32Mismatch { expected: u32, computed: u32 },
    /// The decompressor is reused after a previous failure.
    Failed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParam(msg) => write!(f, "invalid parameter: {msg}"),
            Error::Corrupt(msg) => write!(f, "corrupt stream: {msg}"),
            Error::UnexpectedEnd => f.pad("unexpected end of input"),
            Error::Adler32Mismatch { expected, computed } => write!(
                f,
                "Adler-32 mismatch, expect {expected:#010x} but got {computed:#010x}"
            ),
            Error::Failed => f.pad("decompressor is reused after a failure"),
        }
    }
}

impl std::error::Error for Error {}

type Result<T> = std::result::Result<T, Error>;

const MAX_BITS: usize = 15;
const MAX_SYMBOLS: usize = 288;
const FAST_BITS: usize = 9;
const FAST_SIZE: usize = 1 << FAST_BITS;

const LITLEN: usize = 0;
const DIST: usize = 1;
const CODELEN: usize = 2;

const END_OF_BLOCK: u16 = 256;

/// The order in which code length code lengths are transmitted.
const CODELEN_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// A canonical Huffman decoding table.
#[derive(Clone)]
struct Huffman {
    /// Number of codes of each bit length.
    counts: [u16; MAX_BITS + 1],
    /// Symbols ordered by their codes.
    symbols: [u16; MAX_SYMBOLS],
    /// Lookup by the next `FAST_BITS` input bits: `symbol << 4 | length`, or 0
    /// for codes longer than `FAST_BITS`.
    fast: [u16; FAST_SIZE],
}

impl Default for Huffman {
    fn default() -> Self {
        Self {
            counts: [0; MAX_BITS + 1],
            symbols: [0; MAX_SYMBOLS],
            fast: [0; FAST_SIZE],
        }
    }
}

impl Huffman {
    fn build(&mut self, lengths: &[u8]) -> Result<()> {
        debug_assert!(lengths.len() <= MAX_SYMBOLS);

        self.counts = [0; MAX_BITS + 1];
        for &len in lengths {
            self.counts[usize::from(len)] += 1;
        }
        self.counts[0] = 0;

        let mut left = 1i32;
        for len in 1..=MAX_BITS {
            left = (left << 1) - i32::from(self.counts[len]);
            if left < 0 {
                bail!(Error::Corrupt("over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_BITS + 2];
        for len in 1..=MAX_BITS {
            offsets[len + 1] = offsets[len] + self.counts[len];
        }
        let mut next_code = [0u32; MAX_BITS + 1];
        let mut code = 0u32;
        for len in 1..=MAX_BITS {
            code = (code + u32::from(self.counts[len - 1])) << 1;
            next_code[len] = code;
        }

        self.fast = [0; FAST_SIZE];
        for (sym, &len) in lengths.iter().enumerate() {
            let len = usize::from(len);
            if len == 0 {
                continue;
            }
            self.symbols[usize::from(offsets[len])] = sym as u16;
            offsets[len] += 1;

            let code = next_code[len];
            next_code[len] += 1;
            if len <= FAST_BITS {
                // Codes are packed starting from the most significant bit.
                let mut idx = (code.reverse_bits() >> (32 - len)) as usize;
                while idx < FAST_SIZE {
                    self.fast[idx] = (sym << 4 | len) as u16;
                    idx += 1 << len;
                }
            }
        }
        Ok(())
    }

    /// Decode a symbol from the low `avail` bits of `bits` without consuming
    /// them. Returns `None` if more bits are required.
    fn decode(&self, bits: u64, avail: u32) -> Result<Option<(u16, u32)>> {
        let entry = self.fast[bits as usize & (FAST_SIZE - 1)];
        if entry != 0 {
            let len = u32::from(entry & 0xF);
            return Ok((len <= avail).then_some((entry >> 4, len)));
        }

        let (mut code, mut first, mut index) = (0i32, 0i32, 0i32);
        for len in 1..=MAX_BITS as u32 {
            if len > avail {
                return Ok(None);
            }
            code |= ((bits >> (len - 1)) & 1) as i32;
            let count = i32::from(self.counts[len as usize]);
            if code - count < first {
                let sym = self.symbols[(index + code - first) as usize];
                return Ok(Some((sym, len)));
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(Error::Corrupt("invalid Huffman code"))
    }
}

#[derive(Debug, Clone, Copy)]
struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self { a: 1, b: 0 }
    }
}

impl Adler32 {
    const MOD: u32 = 65521;
    /// The largest run before `b` may overflow `u32`.
    const NMAX: usize = 5552;

    fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(Self::NMAX) {
            for &x in chunk {
                self.a += u32::from(x);
                self.b += self.a;
            }
            self.a %= Self::MOD;
            self.b %= Self::MOD;
        }
    }

    fn finish(self) -> u32 {
        self.b << 16 | self.a
    }
}

/// Resume points of the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ZlibHeader,
    BlockHeader,
    StoredHeader,
    StoredCopy,
    DynamicHeader,
    CodeLengthLengths,
    CodeLengths,
    Symbols,
    Match,
    BlockEnd,
    Trailer,
    Done,
    Failed,
}

/// Buffers and cursors of a single `decompress` call.
struct Window<'a> {
    input: &'a [u8],
    in_pos: usize,
    out: &'a mut [u8],
    out_pos: usize,
    /// Output before this position is already fed into the checksum.
    checksummed: usize,
    /// `usize::MAX` for non-wrapping output.
    mask: usize,
    flags: Flags,
}

impl Window<'_> {
    fn out_full(&self) -> bool {
        self.out_pos == self.out.len()
    }
}

/// A resumable DEFLATE decoder. See the [module level documentation](self).
#[derive(Clone)]
pub struct Decompressor {
    state: State,
    started: bool,
    bit_buf: u64,
    num_bits: u32,
    is_final: bool,
    fixed_loaded: bool,

    num_lit: usize,
    num_dist: usize,
    num_codelen: usize,
    counter: usize,
    lengths: [u8; 286 + 30],
    tables: [Huffman; 3],

    /// Bytes left in the current stored block or back-reference.
    remaining: usize,
    /// Distance of the current back-reference.
    dist: usize,
    total_out: u64,
    adler: Adler32,
}

impl fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decompressor")
            .field("state", &self.state)
            .field("num_bits", &self.num_bits)
            .field("is_final", &self.is_final)
            .field("total_out", &self.total_out)
            .finish_non_exhaustive()
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor {
    pub fn new() -> Self {
        Self {
            state: State::BlockHeader,
            started: false,
            bit_buf: 0,
            num_bits: 0,
            is_final: false,
            fixed_loaded: false,
            num_lit: 0,
            num_dist: 0,
            num_codelen: 0,
            counter: 0,
            lengths: [0; 286 + 30],
            tables: Default::default(),
            remaining: 0,
            dist: 0,
            total_out: 0,
            adler: Adler32::default(),
        }
    }

    /// Restart from the beginning of a new stream.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Total bytes produced since the start of the stream.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Whether the end of the stream is reached.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode from `input` into `out` starting at `out_pos`.
    ///
    /// `flags` must stay the same across calls for one stream, except for
    /// [`Flags::HAS_MORE_INPUT`].
    pub fn decompress(
        &mut self,
        input: &[u8],
        out: &mut [u8],
        out_pos: usize,
        flags: Flags,
    ) -> Result<Progress> {
        if self.state == State::Failed {
            bail!(Error::Failed);
        }
        let ret = self.decompress_inner(input, out, out_pos, flags);
        if ret.is_err() {
            self.state = State::Failed;
        }
        ret
    }

    fn decompress_inner(
        &mut self,
        input: &[u8],
        out: &mut [u8],
        out_pos: usize,
        flags: Flags,
    ) -> Result<Progress> {
        if out_pos > out.len() {
            bail!(Error::InvalidParam("output position is past the buffer"));
        }
        let non_wrapping = flags.contains(Flags::NON_WRAPPING_OUTPUT);
        if !non_wrapping && !out.len().is_power_of_two() {
            bail!(Error::InvalidParam(
                "wrapping output buffer size must be a power of two"
            ));
        }
        if !self.started {
            self.started = true;
            if flags.contains(Flags::ZLIB) {
                self.state = State::ZlibHeader;
            }
        }

        let mask = if non_wrapping {
            usize::MAX
        } else {
            out.len() - 1
        };
        let mut w = Window {
            input,
            in_pos: 0,
            out,
            out_pos,
            checksummed: out_pos,
            mask,
            flags,
        };
        let status = self.run(&mut w)?;
        self.checksum(&mut w);
        Ok(Progress {
            status,
            consumed: w.in_pos,
            produced: w.out_pos - out_pos,
        })
    }

    fn checksum(&mut self, w: &mut Window<'_>) {
        if w.flags.contains(Flags::ZLIB) {
            self.adler.update(&w.out[w.checksummed..w.out_pos]);
        }
        w.checksummed = w.out_pos;
    }

    /// Pull whole input bytes into the bit buffer until it holds `want` bits
    /// or the input runs out. Returns whether `want` bits are available.
    fn pull(&mut self, w: &mut Window<'_>, want: u32) -> bool {
        debug_assert!(want <= 56);
        while self.num_bits < want {
            let Some(&b) = w.input.get(w.in_pos) else {
                return false;
            };
            self.bit_buf |= u64::from(b) << self.num_bits;
            self.num_bits += 8;
            w.in_pos += 1;
        }
        true
    }

    /// Consume `n` bits and return them.
    fn take(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32 && n <= self.num_bits);
        let v = (self.bit_buf & ((1u64 << n) - 1)) as u32;
        self.bit_buf >>= n;
        self.num_bits -= n;
        v
    }

    fn align_to_byte(&mut self) {
        self.take(self.num_bits % 8);
    }

    fn need_input(&self, w: &Window<'_>) -> Result<Status> {
        if w.flags.contains(Flags::HAS_MORE_INPUT) {
            Ok(Status::NeedsMoreInput)
        } else {
            Err(Error::UnexpectedEnd)
        }
    }

    fn emit(&mut self, w: &mut Window<'_>, byte: u8) {
        w.out[w.out_pos] = byte;
        w.out_pos += 1;
        self.total_out += 1;
    }

    fn run(&mut self, w: &mut Window<'_>) -> Result<Status> {
        loop {
            match self.state {
                State::ZlibHeader => {
                    if !self.pull(w, 16) {
                        return self.need_input(w);
                    }
                    let cmf = self.take(8);
                    let flg = self.take(8);
                    if (cmf << 8 | flg) % 31 != 0 {
                        bail!(Error::Corrupt("zlib header check failed"));
                    }
                    if cmf & 0xF != 8 {
                        bail!(Error::Corrupt("zlib compression method is not DEFLATE"));
                    }
                    if flg & 0x20 != 0 {
                        bail!(Error::Corrupt("zlib preset dictionary is not supported"));
                    }
                    let window_bits = 8 + (cmf >> 4);
                    if window_bits > 15 {
                        bail!(Error::Corrupt("zlib window size is too large"));
                    }
                    if w.mask != usize::MAX && w.out.len() < 1 << window_bits {
                        bail!(Error::InvalidParam(
                            "output buffer is smaller than the stream window"
                        ));
                    }
                    self.state = State::BlockHeader;
                }

                State::BlockHeader => {
                    if !self.pull(w, 3) {
                        return self.need_input(w);
                    }
                    self.is_final = self.take(1) != 0;
                    match self.take(2) {
                        0 => {
                            self.align_to_byte();
                            self.state = State::StoredHeader;
                        }
                        1 => {
                            self.load_fixed_tables()?;
                            self.state = State::Symbols;
                        }
                        2 => {
                            self.fixed_loaded = false;
                            self.state = State::DynamicHeader;
                        }
                        _ => bail!(Error::Corrupt("invalid block type")),
                    }
                }

                State::StoredHeader => {
                    if !self.pull(w, 32) {
                        return self.need_input(w);
                    }
                    let len = self.take(16);
                    let nlen = self.take(16);
                    if len != !nlen & 0xFFFF {
                        bail!(Error::Corrupt("stored block length does not match its complement"));
                    }
                    self.remaining = len as usize;
                    self.state = State::StoredCopy;
                }

                State::StoredCopy => {
                    while self.remaining > 0 {
                        if w.out_full() {
                            return Ok(Status::HasMoreOutput);
                        }
                        // Whole bytes already pulled into the bit buffer come first.
                        if self.num_bits >= 8 {
                            let b = self.take(8) as u8;
                            self.emit(w, b);
                            self.remaining -= 1;
                            continue;
                        }
                        let avail = w.input.len() - w.in_pos;
                        if avail == 0 {
                            return self.need_input(w);
                        }
                        let n = self.remaining.min(avail).min(w.out.len() - w.out_pos);
                        w.out[w.out_pos..w.out_pos + n]
                            .copy_from_slice(&w.input[w.in_pos..w.in_pos + n]);
                        w.in_pos += n;
                        w.out_pos += n;
                        self.total_out += n as u64;
                        self.remaining -= n;
                    }
                    self.state = State::BlockEnd;
                }

                State::DynamicHeader => {
                    if !self.pull(w, 14) {
                        return self.need_input(w);
                    }
                    self.num_lit = self.take(5) as usize + 257;
                    self.num_dist = self.take(5) as usize + 1;
                    self.num_codelen = self.take(4) as usize + 4;
                    if self.num_lit > 286 || self.num_dist > 30 {
                        bail!(Error::Corrupt("too many length or distance symbols"));
                    }
                    self.lengths = [0; 286 + 30];
                    self.counter = 0;
                    self.state = State::CodeLengthLengths;
                }

                State::CodeLengthLengths => {
                    while self.counter < self.num_codelen {
                        if !self.pull(w, 3) {
                            return self.need_input(w);
                        }
                        self.lengths[CODELEN_ORDER[self.counter]] = self.take(3) as u8;
                        self.counter += 1;
                    }
                    let (tables, lengths) = (&mut self.tables, &self.lengths);
                    tables[CODELEN].build(&lengths[..19])?;
                    self.lengths = [0; 286 + 30];
                    self.counter = 0;
                    self.state = State::CodeLengths;
                }

                State::CodeLengths => {
                    let total = self.num_lit + self.num_dist;
                    while self.counter < total {
                        // A code length code is at most 7 bits, plus at most 7 repeat bits.
                        self.pull(w, 14);
                        let Some((sym, len)) =
                            self.tables[CODELEN].decode(self.bit_buf, self.num_bits)?
                        else {
                            return self.need_input(w);
                        };
                        if sym < 16 {
                            self.take(len);
                            self.lengths[self.counter] = sym as u8;
                            self.counter += 1;
                            continue;
                        }

                        let (extra, base) = match sym {
                            16 => (2, 3),
                            17 => (3, 3),
                            _ => (7, 11),
                        };
                        if self.num_bits < len + extra {
                            return self.need_input(w);
                        }
                        self.take(len);
                        let repeat = base + self.take(extra) as usize;
                        let value = if sym == 16 {
                            if self.counter == 0 {
                                bail!(Error::Corrupt("repeated code length without a previous one"));
                            }
                            self.lengths[self.counter - 1]
                        } else {
                            0
                        };
                        if self.counter + repeat > total {
                            bail!(Error::Corrupt("too many code lengths"));
                        }
                        self.lengths[self.counter..self.counter + repeat].fill(value);
                        self.counter += repeat;
                    }

                    if self.lengths[usize::from(END_OF_BLOCK)] == 0 {
                        bail!(Error::Corrupt("missing end-of-block code"));
                    }
                    let (tables, lengths) = (&mut self.tables, &self.lengths);
                    tables[LITLEN].build(&lengths[..self.num_lit])?;
                    tables[DIST].build(&lengths[self.num_lit..total])?;
                    self.state = State::Symbols;
                }

                State::Symbols => {
                    if let Some(status) = self.decode_symbols(w)? {
                        return Ok(status);
                    }
                }

                State::Match => {
                    self.copy_match(w);
                    if self.remaining > 0 {
                        return Ok(Status::HasMoreOutput);
                    }
                    self.state = State::Symbols;
                }

                State::BlockEnd => {
                    self.state = if !self.is_final {
                        State::BlockHeader
                    } else if w.flags.contains(Flags::ZLIB) {
                        self.align_to_byte();
                        State::Trailer
                    } else {
                        self.finish(w);
                        State::Done
                    };
                }

                State::Trailer => {
                    if !self.pull(w, 32) {
                        return self.need_input(w);
                    }
                    let mut expected = 0u32;
                    for _ in 0..4 {
                        expected = expected << 8 | self.take(8);
                    }
                    self.checksum(w);
                    let computed = self.adler.finish();
                    if expected != computed {
                        bail!(Error::Adler32Mismatch { expected, computed });
                    }
                    self.finish(w);
                    self.state = State::Done;
                }

                State::Done => return Ok(Status::Done),

                State::Failed => bail!(Error::Failed),
            }
        }
    }

    /// Give back whole bytes pulled past the end of the stream in this call.
    fn finish(&mut self, w: &mut Window<'_>) {
        self.align_to_byte();
        let back = ((self.num_bits / 8) as usize).min(w.in_pos);
        w.in_pos -= back;
        self.num_bits -= back as u32 * 8;
        self.bit_buf &= (1u64 << self.num_bits) - 1;
    }

    fn load_fixed_tables(&mut self) -> Result<()> {
        if self.fixed_loaded {
            return Ok(());
        }
        let mut lengths = [0u8; MAX_SYMBOLS];
        lengths[..144].fill(8);
        lengths[144..256].fill(9);
        lengths[256..280].fill(7);
        lengths[280..].fill(8);
        self.tables[LITLEN].build(&lengths)?;
        self.tables[DIST].build(&[5; 32])?;
        self.fixed_loaded = true;
        Ok(())
    }

    /// Decode literals until the block ends, a back-reference starts, or the
    /// call must suspend. Returns the status to suspend with, if any.
    fn decode_symbols(&mut self, w: &mut Window<'_>) -> Result<Option<Status>> {
        loop {
            self.pull(w, MAX_BITS as u32);
            let Some((sym, len)) = self.tables[LITLEN].decode(self.bit_buf, self.num_bits)? else {
                return self.need_input(w).map(Some);
            };

            if sym < END_OF_BLOCK {
                if w.out_full() {
                    return Ok(Some(Status::HasMoreOutput));
                }
                self.take(len);
                self.emit(w, sym as u8);
                continue;
            }
            if sym == END_OF_BLOCK {
                self.take(len);
                self.state = State::BlockEnd;
                return Ok(None);
            }

            // A back-reference is only consumed once all its parts are available.
            let li = usize::from(sym - 257);
            if li >= LENGTH_BASE.len() {
                bail!(Error::Corrupt("invalid length symbol"));
            }
            let len_extra = u32::from(LENGTH_EXTRA[li]);
            let mut used = len + len_extra;
            self.pull(w, used + MAX_BITS as u32);
            if self.num_bits < used {
                return self.need_input(w).map(Some);
            }
            let length = usize::from(LENGTH_BASE[li])
                + ((self.bit_buf >> len) & ((1u64 << len_extra) - 1)) as usize;

            let Some((dsym, dlen)) =
                self.tables[DIST].decode(self.bit_buf >> used, self.num_bits - used)?
            else {
                return self.need_input(w).map(Some);
            };
            let di = usize::from(dsym);
            if di >= DIST_BASE.len() {
                bail!(Error::Corrupt("invalid distance symbol"));
            }
            used += dlen;
            let dist_extra = u32::from(DIST_EXTRA[di]);
            if !self.pull(w, used + dist_extra) {
                return self.need_input(w).map(Some);
            }
            let dist = usize::from(DIST_BASE[di])
                + ((self.bit_buf >> used) & ((1u64 << dist_extra) - 1)) as usize;
            used += dist_extra;

            if dist as u64 > self.total_out {
                bail!(Error::Corrupt("back-reference before the start of output"));
            }
            if w.mask == usize::MAX {
                if dist > w.out_pos {
                    bail!(Error::InvalidParam(
                        "back-reference before the start of a non-wrapping buffer"
                    ));
                }
            } else if dist > w.out.len() {
                bail!(Error::InvalidParam("back-reference is farther than the ring buffer"));
            }

            self.take(used);
            self.remaining = length;
            self.dist = dist;
            self.state = State::Match;
            return Ok(None);
        }
    }

    fn copy_match(&mut self, w: &mut Window<'_>) {
        while self.remaining > 0 && !w.out_full() {
            let src = w.out_pos.wrapping_sub(self.dist) & w.mask;
            let n = self.remaining.min(w.out.len() - w.out_pos);
            if src < w.out_pos && src + n <= w.out_pos {
                // Non-overlapping and not wrapping.
                w.out.copy_within(src..src + n, w.out_pos);
                w.out_pos += n;
                self.total_out += n as u64;
                self.remaining -= n;
            } else {
                let b = w.out[src];
                self.emit(w, b);
                self.remaining -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_RAW: &[u8] = &[0xcb, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00];
    const HELLO_ZLIB: &[u8] = &[
        0x78, 0x9c, 0xcb, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00, 0x06, 0x2c, 0x02, 0x15,
    ];
    const HELLO_STORED: &[u8] = &[0x01, 0x05, 0x00, 0xfa, 0xff, b'h', b'e', b'l', b'l', b'o'];

    /// Bit writer for hand-assembled streams.
    #[derive(Default)]
    struct Bits {
        out: Vec<u8>,
        acc: u64,
        n: u32,
    }

    impl Bits {
        fn put(&mut self, value: u32, n: u32) -> &mut Self {
            self.acc |= u64::from(value) << self.n;
            self.n += n;
            while self.n >= 8 {
                self.out.push(self.acc as u8);
                self.acc >>= 8;
                self.n -= 8;
            }
            self
        }

        /// Huffman codes go most significant bit first.
        fn code(&mut self, code: u32, n: u32) -> &mut Self {
            self.put(code.reverse_bits() >> (32 - n), n)
        }

        fn finish(&mut self) -> Vec<u8> {
            if self.n > 0 {
                self.out.push(self.acc as u8);
            }
            std::mem::take(&mut self.out)
        }
    }

    /// "abc" followed by a length 9 distance 3 back-reference, in one fixed block.
    fn abc_repeated() -> Vec<u8> {
        let mut b = Bits::default();
        b.put(1, 1).put(1, 2);
        for lit in *b"abc" {
            b.code(0x30 + u32::from(lit), 8);
        }
        // Length 9 is symbol 263, distance 3 is distance code 2.
        b.code(263 - 256, 7).code(2, 5);
        b.code(0, 7);
        b.finish()
    }

    fn inflate_all(input: &[u8], flags: Flags) -> Result<Vec<u8>> {
        let mut out = vec![0u8; 1 << 16];
        let mut d = Decompressor::new();
        let p = d.decompress(input, &mut out, 0, flags | Flags::NON_WRAPPING_OUTPUT)?;
        assert_eq!(p.status, Status::Done);
        assert_eq!(p.consumed, input.len());
        out.truncate(p.produced);
        Ok(out)
    }

    /// Feed `in_step` bytes of input at a time into a `ring`-sized ring buffer.
    fn inflate_chunked(input: &[u8], flags: Flags, in_step: usize, ring: usize) -> Vec<u8> {
        let mut d = Decompressor::new();
        let mut buf = vec![0u8; ring];
        let mut out = Vec::new();
        let (mut in_pos, mut out_pos) = (0, 0);
        loop {
            if out_pos == ring {
                out_pos = 0;
            }
            let end = (in_pos + in_step).min(input.len());
            let mut f = flags;
            if end < input.len() {
                f |= Flags::HAS_MORE_INPUT;
            }
            let p = d.decompress(&input[in_pos..end], &mut buf, out_pos, f).unwrap();
            out.extend_from_slice(&buf[out_pos..out_pos + p.produced]);
            in_pos += p.consumed;
            out_pos += p.produced;
            match p.status {
                Status::Done => return out,
                Status::HasMoreOutput => assert_eq!(out_pos, ring),
                Status::NeedsMoreInput => assert_eq!(in_pos, end),
            }
        }
    }

    #[test]
    fn known_streams() {
        assert_eq!(inflate_all(HELLO_RAW, Flags::empty()).unwrap(), b"hello");
        assert_eq!(inflate_all(HELLO_ZLIB, Flags::ZLIB).unwrap(), b"hello");
        assert_eq!(inflate_all(HELLO_STORED, Flags::empty()).unwrap(), b"hello");
        assert_eq!(inflate_all(&abc_repeated(), Flags::empty()).unwrap(), b"abcabcabcabc");
        // An empty final fixed block.
        assert_eq!(inflate_all(&[0x03, 0x00], Flags::empty()).unwrap(), b"");
    }

    #[test]
    fn tiny_buffers() {
        for (input, flags, expect) in [
            (HELLO_RAW, Flags::empty(), &b"hello"[..]),
            (HELLO_STORED, Flags::empty(), b"hello"),
            (&abc_repeated()[..], Flags::empty(), b"abcabcabcabc"),
        ] {
            for in_step in [1, 2, 3, 64] {
                // Ring of 4 holds the distance-3 back-reference.
                for ring in [4, 8, 1 << 15] {
                    let got = inflate_chunked(input, flags, in_step, ring);
                    assert_eq!(got, expect, "in_step={in_step} ring={ring}");
                }
            }
        }
        for in_step in [1, 5, 13] {
            let got = inflate_chunked(HELLO_ZLIB, Flags::ZLIB, in_step, 1 << 15);
            assert_eq!(got, b"hello");
        }
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut input = HELLO_RAW.to_vec();
        input.extend_from_slice(b"trailing");
        let mut out = [0u8; 16];
        let p = Decompressor::new()
            .decompress(&input, &mut out, 0, Flags::NON_WRAPPING_OUTPUT)
            .unwrap();
        assert_eq!(p.status, Status::Done);
        assert_eq!(p.consumed, HELLO_RAW.len());
        assert_eq!(&out[..p.produced], b"hello");
    }

    #[test]
    fn adler32_mismatch_is_terminal() {
        let mut input = HELLO_ZLIB.to_vec();
        *input.last_mut().unwrap() ^= 1;
        let mut out = [0u8; 16];
        let mut d = Decompressor::new();
        let err = d
            .decompress(&input, &mut out, 0, Flags::ZLIB | Flags::NON_WRAPPING_OUTPUT)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Adler32Mismatch {
                expected: 0x062c_0214,
                computed: 0x062c_0215,
            }
        );
        assert_eq!(
            d.decompress(&input, &mut out, 0, Flags::NON_WRAPPING_OUTPUT),
            Err(Error::Failed),
        );

        d.reset();
        let p = d
            .decompress(HELLO_ZLIB, &mut out, 0, Flags::ZLIB | Flags::NON_WRAPPING_OUTPUT)
            .unwrap();
        assert_eq!(&out[..p.produced], b"hello");
    }

    #[test]
    fn malformed() {
        let mut out = [0u8; 16];
        let mut run = |input: &[u8]| {
            Decompressor::new()
                .decompress(input, &mut out, 0, Flags::NON_WRAPPING_OUTPUT)
                .unwrap_err()
        };
        // Block type 3.
        assert_eq!(run(&[0x07]), Error::Corrupt("invalid block type"));
        // Stored length complement mismatch.
        assert!(matches!(run(&[0x01, 0x05, 0x00, 0x00, 0x00]), Error::Corrupt(_)));
        // Truncated without promising more input.
        assert_eq!(run(&HELLO_RAW[..3]), Error::UnexpectedEnd);

        // Back-reference before any output.
        let mut b = Bits::default();
        b.put(1, 1).put(1, 2).code(263 - 256, 7).code(2, 5).code(0, 7);
        assert!(matches!(run(&b.finish()), Error::Corrupt(_)));
    }

    #[test]
    fn invalid_ring() {
        let mut out = [0u8; 3];
        let err = Decompressor::new()
            .decompress(HELLO_RAW, &mut out, 0, Flags::empty())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));

        // A zlib window of 32KiB does not fit a smaller ring.
        let mut out = [0u8; 1024];
        let err = Decompressor::new()
            .decompress(HELLO_ZLIB, &mut out, 0, Flags::ZLIB)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
    }

    #[test]
    fn adler32() {
        let mut a = Adler32::default();
        a.update(b"Wikipedia");
        assert_eq!(a.finish(), 0x11E6_0398);

        let data = vec![0xFFu8; 100_000];
        let mut whole = Adler32::default();
        whole.update(&data);
        let mut split = Adler32::default();
        for chunk in data.chunks(777) {
            split.update(chunk);
        }
        assert_eq!(whole.finish(), split.finish());
    }
}
