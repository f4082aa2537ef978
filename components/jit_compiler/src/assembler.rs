//! Minimal x86-64 encoder with labels.
//!
//! Emits exactly the instruction forms the template compiler needs.
//! Labels starting with `.` are local: they resolve within the innermost
//! label scope, so per-opcode templates can reuse `.ARITHMETIC_*` names.

use rustc_hash::FxHashMap;
use thiserror::Error;

/// General-purpose registers, hardware encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
}

/// Condition codes as encoded in `jcc`/`setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Overflow = 0x0,
    Equal = 0x4,
    NotEqual = 0x5,
    Sign = 0x8,
    Less = 0xC,
    GreaterEq = 0xD,
    LessEq = 0xE,
    Greater = 0xF,
}

#[derive(Debug, Error, PartialEq)]
pub enum AsmError {
    #[error("unresolved label `{0}`")]
    UnresolvedLabel(String),
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
}

/// Guard for a local label scope. Obtain with
/// [`Assembler::enter_local_scope`], return with
/// [`Assembler::exit_local_scope`].
#[must_use = "a local scope must be exited"]
pub struct LocalLabelScope {
    previous: u32,
}

type LabelKey = (u32, String);

struct Fixup {
    at: usize,
    key: LabelKey,
}

/// Code emitter.
pub struct Assembler {
    buf: Vec<u8>,
    labels: FxHashMap<LabelKey, usize>,
    fixups: Vec<Fixup>,
    scope: u32,
    next_scope: u32,
    error: Option<AsmError>,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            buf: Vec::with_capacity(256),
            labels: FxHashMap::default(),
            fixups: Vec::new(),
            scope: 0,
            next_scope: 1,
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Open a fresh local label scope; `.`-prefixed labels bound or
    /// referenced until the matching exit resolve within it.
    pub fn enter_local_scope(&mut self) -> LocalLabelScope {
        let guard = LocalLabelScope {
            previous: self.scope,
        };
        self.scope = self.next_scope;
        self.next_scope += 1;
        guard
    }

    pub fn exit_local_scope(&mut self, guard: LocalLabelScope) {
        self.scope = guard.previous;
    }

    fn key(&self, name: &str) -> LabelKey {
        if name.starts_with('.') {
            (self.scope, name.to_string())
        } else {
            (0, name.to_string())
        }
    }

    /// Bind a label at the current position.
    pub fn bind(&mut self, name: &str) {
        let key = self.key(name);
        if self.labels.insert(key, self.buf.len()).is_some() && self.error.is_none() {
            self.error = Some(AsmError::DuplicateLabel(name.to_string()));
        }
    }

    /// Finalize: patch every rel32 fixup. Fails on unresolved or duplicate
    /// labels.
    pub fn finish(mut self) -> Result<Vec<u8>, AsmError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        for fixup in &self.fixups {
            let Some(&target) = self.labels.get(&fixup.key) else {
                return Err(AsmError::UnresolvedLabel(fixup.key.1.clone()));
            };
            let rel = target as i64 - (fixup.at as i64 + 4);
            let bytes = (rel as i32).to_le_bytes();
            self.buf[fixup.at..fixup.at + 4].copy_from_slice(&bytes);
        }
        Ok(self.buf)
    }

    // -- low-level emission helpers --

    fn byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn bytes(&mut self, bs: &[u8]) {
        self.buf.extend_from_slice(bs);
    }

    fn imm32(&mut self, v: i32) {
        self.bytes(&v.to_le_bytes());
    }

    fn imm64(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }

    /// REX prefix; omitted when no bit is needed.
    fn rex(&mut self, w: bool, reg: u8, rm: u8) {
        let mut b = 0x40u8;
        if w {
            b |= 0x08;
        }
        if reg & 8 != 0 {
            b |= 0x04;
        }
        if rm & 8 != 0 {
            b |= 0x01;
        }
        if b != 0x40 || w {
            self.byte(b);
        }
    }

    fn modrm(&mut self, md: u8, reg: u8, rm: u8) {
        self.byte((md << 6) | ((reg & 7) << 3) | (rm & 7));
    }

    /// ModRM for `[base + disp32]`.
    fn mem(&mut self, reg: u8, base: u8, disp: i32) {
        self.modrm(0b10, reg, base);
        if base & 7 == 4 {
            // rsp/r12 base needs a SIB byte
            self.byte(0x24);
        }
        self.imm32(disp);
    }

    // -- stack --

    pub fn push(&mut self, r: Reg) {
        self.rex(false, 0, r as u8);
        self.byte(0x50 + (r as u8 & 7));
    }

    pub fn pop(&mut self, r: Reg) {
        self.rex(false, 0, r as u8);
        self.byte(0x58 + (r as u8 & 7));
    }

    // -- moves --

    pub fn mov_rr64(&mut self, dst: Reg, src: Reg) {
        self.rex(true, src as u8, dst as u8);
        self.byte(0x89);
        self.modrm(0b11, src as u8, dst as u8);
    }

    /// mov dst32, src32; zero-extends into the upper half.
    pub fn mov_rr32(&mut self, dst: Reg, src: Reg) {
        self.rex(false, src as u8, dst as u8);
        self.byte(0x89);
        self.modrm(0b11, src as u8, dst as u8);
    }

    /// movabs dst, imm64
    pub fn mov_ri64(&mut self, dst: Reg, imm: u64) {
        self.rex(true, 0, dst as u8);
        self.byte(0xB8 + (dst as u8 & 7));
        self.imm64(imm);
    }

    /// mov dst, qword [base + disp]
    pub fn mov_rm64(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.rex(true, dst as u8, base as u8);
        self.byte(0x8B);
        self.mem(dst as u8, base as u8, disp);
    }

    /// mov qword [base + disp], src
    pub fn mov_mr64(&mut self, base: Reg, disp: i32, src: Reg) {
        self.rex(true, src as u8, base as u8);
        self.byte(0x89);
        self.mem(src as u8, base as u8, disp);
    }

    // -- 32-bit ALU, register forms --

    fn alu_rr32(&mut self, opcode: u8, dst: Reg, src: Reg) {
        self.rex(false, src as u8, dst as u8);
        self.byte(opcode);
        self.modrm(0b11, src as u8, dst as u8);
    }

    pub fn add_rr32(&mut self, dst: Reg, src: Reg) {
        self.alu_rr32(0x01, dst, src);
    }

    pub fn sub_rr32(&mut self, dst: Reg, src: Reg) {
        self.alu_rr32(0x29, dst, src);
    }

    pub fn and_rr32(&mut self, dst: Reg, src: Reg) {
        self.alu_rr32(0x21, dst, src);
    }

    pub fn or_rr32(&mut self, dst: Reg, src: Reg) {
        self.alu_rr32(0x09, dst, src);
    }

    pub fn xor_rr32(&mut self, dst: Reg, src: Reg) {
        self.alu_rr32(0x31, dst, src);
    }

    pub fn cmp_rr32(&mut self, lhs: Reg, rhs: Reg) {
        self.alu_rr32(0x39, lhs, rhs);
    }

    pub fn test_rr32(&mut self, lhs: Reg, rhs: Reg) {
        self.alu_rr32(0x85, lhs, rhs);
    }

    /// imul dst, src (32-bit)
    pub fn imul_rr32(&mut self, dst: Reg, src: Reg) {
        self.rex(false, dst as u8, src as u8);
        self.bytes(&[0x0F, 0xAF]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    /// imul dst, src, imm32
    pub fn imul_rri32(&mut self, dst: Reg, src: Reg, imm: i32) {
        self.rex(false, dst as u8, src as u8);
        self.byte(0x69);
        self.modrm(0b11, dst as u8, src as u8);
        self.imm32(imm);
    }

    // -- 32-bit ALU, immediate forms (81 /n id) --

    fn alu_ri32(&mut self, ext: u8, dst: Reg, imm: i32) {
        self.rex(false, 0, dst as u8);
        self.byte(0x81);
        self.modrm(0b11, ext, dst as u8);
        self.imm32(imm);
    }

    pub fn add_ri32(&mut self, dst: Reg, imm: i32) {
        self.alu_ri32(0, dst, imm);
    }

    pub fn or_ri32(&mut self, dst: Reg, imm: i32) {
        self.alu_ri32(1, dst, imm);
    }

    pub fn and_ri32(&mut self, dst: Reg, imm: i32) {
        self.alu_ri32(4, dst, imm);
    }

    pub fn sub_ri32(&mut self, dst: Reg, imm: i32) {
        self.alu_ri32(5, dst, imm);
    }

    pub fn xor_ri32(&mut self, dst: Reg, imm: i32) {
        self.alu_ri32(6, dst, imm);
    }

    pub fn cmp_ri32(&mut self, dst: Reg, imm: i32) {
        self.alu_ri32(7, dst, imm);
    }

    // -- 64-bit forms used for boxing and guards --

    /// or dst, src (64-bit)
    pub fn or_rr64(&mut self, dst: Reg, src: Reg) {
        self.rex(true, src as u8, dst as u8);
        self.byte(0x09);
        self.modrm(0b11, src as u8, dst as u8);
    }

    /// add dst, src (64-bit)
    pub fn add_rr64(&mut self, dst: Reg, src: Reg) {
        self.rex(true, src as u8, dst as u8);
        self.byte(0x01);
        self.modrm(0b11, src as u8, dst as u8);
    }

    /// sub dst, src (64-bit)
    pub fn sub_rr64(&mut self, dst: Reg, src: Reg) {
        self.rex(true, src as u8, dst as u8);
        self.byte(0x29);
        self.modrm(0b11, src as u8, dst as u8);
    }

    /// shr dst, imm8 (64-bit)
    pub fn shr_ri64(&mut self, dst: Reg, imm: u8) {
        self.rex(true, 0, dst as u8);
        self.byte(0xC1);
        self.modrm(0b11, 5, dst as u8);
        self.byte(imm);
    }

    /// movsxd dst, src32
    pub fn movsxd(&mut self, dst: Reg, src: Reg) {
        self.rex(true, dst as u8, src as u8);
        self.byte(0x63);
        self.modrm(0b11, dst as u8, src as u8);
    }

    // -- shifts by cl / imm8, 32-bit --

    fn shift_cl32(&mut self, ext: u8, dst: Reg) {
        self.rex(false, 0, dst as u8);
        self.byte(0xD3);
        self.modrm(0b11, ext, dst as u8);
    }

    pub fn shl_cl32(&mut self, dst: Reg) {
        self.shift_cl32(4, dst);
    }

    pub fn shr_cl32(&mut self, dst: Reg) {
        self.shift_cl32(5, dst);
    }

    pub fn sar_cl32(&mut self, dst: Reg) {
        self.shift_cl32(7, dst);
    }

    fn shift_ri32(&mut self, ext: u8, dst: Reg, imm: u8) {
        self.rex(false, 0, dst as u8);
        self.byte(0xC1);
        self.modrm(0b11, ext, dst as u8);
        self.byte(imm);
    }

    pub fn shl_ri32(&mut self, dst: Reg, imm: u8) {
        self.shift_ri32(4, dst, imm);
    }

    pub fn shr_ri32(&mut self, dst: Reg, imm: u8) {
        self.shift_ri32(5, dst, imm);
    }

    pub fn sar_ri32(&mut self, dst: Reg, imm: u8) {
        self.shift_ri32(7, dst, imm);
    }

    // -- SSE2 conversions and arithmetic --

    /// cvtsi2sd xmm, r32
    pub fn cvtsi2sd32(&mut self, dst: Xmm, src: Reg) {
        self.byte(0xF2);
        self.rex(false, dst as u8, src as u8);
        self.bytes(&[0x0F, 0x2A]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    /// cvtsi2sd xmm, r64
    pub fn cvtsi2sd64(&mut self, dst: Xmm, src: Reg) {
        self.byte(0xF2);
        self.rex(true, dst as u8, src as u8);
        self.bytes(&[0x0F, 0x2A]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    pub fn addsd(&mut self, dst: Xmm, src: Xmm) {
        self.bytes(&[0xF2, 0x0F, 0x58]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    pub fn subsd(&mut self, dst: Xmm, src: Xmm) {
        self.bytes(&[0xF2, 0x0F, 0x5C]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    pub fn mulsd(&mut self, dst: Xmm, src: Xmm) {
        self.bytes(&[0xF2, 0x0F, 0x59]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    /// movq r64, xmm
    pub fn movq_rx(&mut self, dst: Reg, src: Xmm) {
        self.byte(0x66);
        self.rex(true, src as u8, dst as u8);
        self.bytes(&[0x0F, 0x7E]);
        self.modrm(0b11, src as u8, dst as u8);
    }

    /// movq xmm, r64
    pub fn movq_xr(&mut self, dst: Xmm, src: Reg) {
        self.byte(0x66);
        self.rex(true, dst as u8, src as u8);
        self.bytes(&[0x0F, 0x6E]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    // -- setcc / movzx --

    /// setcc on the low byte of dst (dst must be rax..rdx)
    pub fn setcc(&mut self, cond: Cond, dst: Reg) {
        debug_assert!((dst as u8) < 4);
        self.bytes(&[0x0F, 0x90 + cond as u8]);
        self.modrm(0b11, 0, dst as u8);
    }

    /// movzx dst32, src8 (src must be rax..rdx)
    pub fn movzx_rr8(&mut self, dst: Reg, src: Reg) {
        debug_assert!((src as u8) < 4);
        self.rex(false, dst as u8, src as u8);
        self.bytes(&[0x0F, 0xB6]);
        self.modrm(0b11, dst as u8, src as u8);
    }

    // -- memory byte compare --

    /// cmp byte [base + disp], imm8
    pub fn cmp_mi8(&mut self, base: Reg, disp: i32, imm: u8) {
        self.rex(false, 0, base as u8);
        self.byte(0x80);
        self.mem(7, base as u8, disp);
        self.byte(imm);
    }

    // -- calls and returns --

    /// call qword [base + disp]
    pub fn call_m(&mut self, base: Reg, disp: i32) {
        self.rex(false, 0, base as u8);
        self.byte(0xFF);
        self.mem(2, base as u8, disp);
    }

    pub fn ret(&mut self) {
        self.byte(0xC3);
    }

    // -- branches --

    pub fn jmp(&mut self, label: &str) {
        self.byte(0xE9);
        self.branch_fixup(label);
    }

    pub fn jcc(&mut self, cond: Cond, label: &str) {
        self.bytes(&[0x0F, 0x80 + cond as u8]);
        self.branch_fixup(label);
    }

    fn branch_fixup(&mut self, label: &str) {
        let key = self.key(label);
        self.fixups.push(Fixup {
            at: self.buf.len(),
            key,
        });
        self.imm32(0);
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
